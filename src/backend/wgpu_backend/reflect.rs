//! Resource reflection over naga modules
//!
//! Programs use this to resolve uniform block names to binding slots and to
//! build bind group layouts without hand-written descriptors.

use std::collections::BTreeMap;

/// Kind of a resource bound to a shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// Uniform block; `size` is the byte size of the block type
    Uniform { size: u64 },
    Texture { cube: bool },
    Sampler,
}

/// One bound resource of a shader module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub group: u32,
    pub binding: u32,
    /// Variable name, empty for anonymous blocks
    pub name: String,
    /// Name of the block type (`Matrices` in `uniform Matrices { .. }`)
    pub type_name: String,
    pub kind: ResourceKind,
}

/// Bound resources of one stage, or of a whole program after `merge`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    pub bindings: Vec<ReflectedBinding>,
}

impl ShaderReflection {
    pub fn from_module(module: &naga::Module) -> Self {
        let mut bindings = Vec::new();
        for (_, var) in module.global_variables.iter() {
            let Some(resource) = &var.binding else {
                continue;
            };
            let ty = &module.types[var.ty];
            let kind = match (var.space, &ty.inner) {
                (naga::AddressSpace::Uniform, inner) => ResourceKind::Uniform {
                    size: inner.size(module.to_ctx()) as u64,
                },
                (naga::AddressSpace::Handle, naga::TypeInner::Image { dim, .. }) => {
                    ResourceKind::Texture {
                        cube: *dim == naga::ImageDimension::Cube,
                    }
                }
                (naga::AddressSpace::Handle, naga::TypeInner::Sampler { .. }) => {
                    ResourceKind::Sampler
                }
                _ => continue,
            };
            bindings.push(ReflectedBinding {
                group: resource.group,
                binding: resource.binding,
                name: var.name.clone().unwrap_or_default(),
                type_name: ty.name.clone().unwrap_or_default(),
                kind,
            });
        }
        bindings.sort_by_key(|b| (b.group, b.binding));
        Self { bindings }
    }

    /// Union of two stages. The first occurrence of a (group, binding) wins.
    pub fn merge(&self, other: &ShaderReflection) -> ShaderReflection {
        let mut merged: BTreeMap<(u32, u32), ReflectedBinding> = BTreeMap::new();
        for binding in self.bindings.iter().chain(other.bindings.iter()) {
            merged
                .entry((binding.group, binding.binding))
                .or_insert_with(|| binding.clone());
        }
        ShaderReflection {
            bindings: merged.into_values().collect(),
        }
    }

    /// Binding of a uniform block looked up by variable name, block type
    /// name, or the `type_<name>` form some front-ends emit
    pub fn uniform_binding(&self, name: &str) -> Option<u32> {
        self.bindings
            .iter()
            .filter(|b| matches!(b.kind, ResourceKind::Uniform { .. }))
            .find(|b| {
                b.name == name
                    || b.type_name == name
                    || b.type_name.strip_prefix("type_") == Some(name)
            })
            .map(|b| b.binding)
    }

    pub fn has_uniform_binding(&self, binding: u32) -> bool {
        self.bindings
            .iter()
            .any(|b| b.binding == binding && matches!(b.kind, ResourceKind::Uniform { .. }))
    }

    /// Number of bind groups the pipeline layout needs
    pub fn group_count(&self) -> u32 {
        self.bindings.iter().map(|b| b.group + 1).max().unwrap_or(0)
    }

    pub fn group(&self, group: u32) -> impl Iterator<Item = &ReflectedBinding> {
        self.bindings.iter().filter(move |b| b.group == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r#"#version 450
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec3 a_normal;
layout(set = 0, binding = 0) uniform Matrices {
    mat4 model;
    mat4 view;
    mat4 projection;
};
layout(location = 0) out vec3 v_normal;
void main() {
    v_normal = a_normal;
    gl_Position = projection * view * model * vec4(a_position, 1.0);
}
"#;

    const FRAGMENT: &str = r#"#version 450
layout(location = 0) in vec3 v_normal;
layout(set = 0, binding = 1) uniform MaterialData {
    vec4 color;
};
layout(set = 0, binding = 2) uniform LightData {
    vec4 direction;
};
layout(location = 0) out vec4 frag_color;
void main() {
    float lit = max(dot(normalize(v_normal), -direction.xyz), 0.1);
    frag_color = vec4(color.rgb * lit, color.a);
}
"#;

    fn parse(source: &str, stage: naga::ShaderStage) -> ShaderReflection {
        let module = naga::front::glsl::Frontend::default()
            .parse(&naga::front::glsl::Options::from(stage), source)
            .unwrap();
        ShaderReflection::from_module(&module)
    }

    #[test]
    fn finds_blocks_by_type_name() {
        let vertex = parse(VERTEX, naga::ShaderStage::Vertex);
        let fragment = parse(FRAGMENT, naga::ShaderStage::Fragment);
        let program = vertex.merge(&fragment);

        assert_eq!(program.uniform_binding("Matrices"), Some(0));
        assert_eq!(program.uniform_binding("MaterialData"), Some(1));
        assert_eq!(program.uniform_binding("LightData"), Some(2));
        assert_eq!(program.uniform_binding("Missing"), None);
        assert_eq!(program.group_count(), 1);
    }

    #[test]
    fn matrices_block_is_three_mat4() {
        let vertex = parse(VERTEX, naga::ShaderStage::Vertex);
        assert_eq!(
            vertex.bindings[0].kind,
            ResourceKind::Uniform { size: 3 * 64 }
        );
    }
}
