use core::fmt;

wire_struct! {
    /// Protocol-level object identity.
    ///
    /// `index` selects a table slot and `generation` distinguishes successive
    /// occupants of that slot. Ids are never resolved by the codec.
    #[derive(Copy, Eq, Hash, Default)]
    pub struct ObjectId {
        pub index: u32,
        pub generation: u32,
    }
}

impl ObjectId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.index, self.generation)
    }
}

wire_enum! {
    /// Each type has its own id space on both endpoints.
    pub enum ObjectType {
        Adapter = 0,
        Device = 1,
        Queue = 2,
        Buffer = 3,
        Texture = 4,
        TextureView = 5,
        Sampler = 6,
        ShaderModule = 7,
        BindGroupLayout = 8,
        BindGroup = 9,
        PipelineLayout = 10,
        ComputePipeline = 11,
        CommandEncoder = 12,
        ComputePassEncoder = 13,
        CommandBuffer = 14,
    }
}

impl ObjectType {
    pub const COUNT: usize = 15;

    /// Dense index for per-type table arrays.
    pub const fn table_index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_types_are_dense() {
        assert_eq!(ObjectType::ALL.len(), ObjectType::COUNT);
        for (i, ty) in ObjectType::ALL.iter().enumerate() {
            assert_eq!(ty.table_index(), i);
            assert_eq!(ObjectType::from_u32(i as u32), Some(*ty));
        }
        assert_eq!(ObjectType::from_u32(ObjectType::COUNT as u32), None);
    }
}
