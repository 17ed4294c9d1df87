//! Light types for the scene

use glam::Vec3;

use crate::backend::LightUniform;

/// Light type tag, stored as a single byte in compiled scenes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum LightType {
    #[default]
    Directional = 0,
    Point = 1,
    Spot = 2,
}

impl TryFrom<u8> for LightType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LightType::Directional),
            1 => Ok(LightType::Point),
            2 => Ok(LightType::Spot),
            other => Err(other),
        }
    }
}

/// Immutable light value, copied into the backend's light list each frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Light {
    pub light_type: LightType,
    pub direction: Vec3,
}

impl Light {
    pub fn new(light_type: LightType, direction: Vec3) -> Self {
        Self {
            light_type,
            direction,
        }
    }

    pub fn directional(direction: Vec3) -> Self {
        Self::new(LightType::Directional, direction)
    }

    /// Convert to the slot 2 uniform layout
    pub fn to_uniform(&self) -> LightUniform {
        LightUniform {
            direction: self.direction.extend(self.light_type as u8 as f32).to_array(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_match_wire_values() {
        for tag in 0u8..3 {
            let ty = LightType::try_from(tag).unwrap();
            assert_eq!(ty as u8, tag);
        }
        assert_eq!(LightType::try_from(3), Err(3));
    }

    #[test]
    fn uniform_carries_direction_and_type() {
        let light = Light::new(LightType::Spot, Vec3::new(0.0, -1.0, 0.5));
        assert_eq!(light.to_uniform().direction, [0.0, -1.0, 0.5, 2.0]);
    }
}
