//! Host-side mirrors of GPU buffer layouts.
//!
//! A reflected field list is turned into a [`BlockLayout`] by inserting
//! padding exactly where the GPU would: every field starts at a multiple of
//! its alignment, and in uniform buffers structs and array elements are
//! aligned to 16 bytes with array strides rounded up to 16. The same rules
//! cover WGSL `var<uniform>` and GLSL `std140` blocks. Storage buffers use
//! natural alignment.
//!
//! A [`HostBlock`] owns the bytes for one layout and writes values by
//! flattened path (`lights[2].color`), checking type and bounds on every
//! write.

use std::collections::HashMap;
use std::fmt;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Field types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressSpace {
    Uniform,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    F32,
    I32,
    U32,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    /// `count == None` is a runtime-sized array; it must be the last field.
    Array {
        element: Box<FieldType>,
        count: Option<u32>,
    },
    Struct {
        name: String,
        fields: Vec<Field>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

impl FieldType {
    pub fn array(element: FieldType, count: u32) -> Self {
        FieldType::Array {
            element: Box::new(element),
            count: Some(count),
        }
    }

    pub fn runtime_array(element: FieldType) -> Self {
        FieldType::Array {
            element: Box::new(element),
            count: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, FieldType::Array { .. } | FieldType::Struct { .. })
    }

    pub fn align(&self, space: AddressSpace) -> u32 {
        match self {
            FieldType::F32 | FieldType::I32 | FieldType::U32 => 4,
            FieldType::Vec2 => 8,
            FieldType::Vec3 | FieldType::Vec4 | FieldType::Mat3 | FieldType::Mat4 => 16,
            FieldType::Array { element, .. } => {
                let align = element.align(space);
                match space {
                    AddressSpace::Uniform => round_up(align, 16),
                    AddressSpace::Storage => align,
                }
            }
            FieldType::Struct { fields, .. } => {
                let align = fields.iter().map(|f| f.ty.align(space)).max().unwrap_or(4);
                match space {
                    AddressSpace::Uniform => round_up(align, 16),
                    AddressSpace::Storage => align,
                }
            }
        }
    }

    /// Size in bytes. Runtime-sized arrays report the size of zero elements.
    pub fn size(&self, space: AddressSpace) -> u32 {
        match self {
            FieldType::F32 | FieldType::I32 | FieldType::U32 => 4,
            FieldType::Vec2 => 8,
            FieldType::Vec3 => 12,
            FieldType::Vec4 => 16,
            // Three vec3 columns, each padded to 16 bytes.
            FieldType::Mat3 => 48,
            FieldType::Mat4 => 64,
            FieldType::Array { count, .. } => self.stride(space) * count.unwrap_or(0),
            FieldType::Struct { fields, .. } => {
                let mut offset = 0;
                for field in fields {
                    offset = round_up(offset, field.ty.align(space)) + field.ty.size(space);
                }
                round_up(offset, self.align(space))
            }
        }
    }

    /// Element stride for arrays; the type's own padded size otherwise.
    pub fn stride(&self, space: AddressSpace) -> u32 {
        match self {
            FieldType::Array { element, .. } => {
                let stride = round_up(element.size(space), element.align(space));
                match space {
                    AddressSpace::Uniform => round_up(stride, 16),
                    AddressSpace::Storage => stride,
                }
            }
            other => round_up(other.size(space), other.align(space)),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FieldType::F32 => "f32",
            FieldType::I32 => "i32",
            FieldType::U32 => "u32",
            FieldType::Vec2 => "vec2",
            FieldType::Vec3 => "vec3",
            FieldType::Vec4 => "vec4",
            FieldType::Mat3 => "mat3",
            FieldType::Mat4 => "mat4",
            FieldType::Array { .. } => "array",
            FieldType::Struct { .. } => "struct",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Array {
                element,
                count: Some(n),
            } => write!(f, "array<{element}, {n}>"),
            FieldType::Array {
                element,
                count: None,
            } => write!(f, "array<{element}>"),
            FieldType::Struct { name, .. } => f.write_str(name),
            other => f.write_str(other.label()),
        }
    }
}

// ---------------------------------------------------------------------------
// BlockLayout
// ---------------------------------------------------------------------------

/// A leaf field at its final byte offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLayout {
    pub path: String,
    pub ty: FieldType,
    pub offset: u32,
}

/// A run of padding bytes inserted by the layout algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    pub offset: u32,
    pub len: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockLayout {
    pub name: String,
    pub space: AddressSpace,
    pub size: u32,
    pub align: u32,
    /// Offsets of the top-level fields, in declaration order.
    pub members: Vec<(String, u32)>,
    /// Every leaf field, flattened, in offset order.
    pub fields: Vec<FieldLayout>,
    pub padding: Vec<Padding>,
    /// Element stride of a trailing runtime-sized array, if any.
    pub runtime_stride: Option<u32>,
}

impl BlockLayout {
    /// Lay out `fields` under the rules of `space`.
    pub fn compute(name: impl Into<String>, fields: &[Field], space: AddressSpace) -> Self {
        let root = FieldType::Struct {
            name: String::new(),
            fields: fields.to_vec(),
        };
        let mut layout = Self {
            name: name.into(),
            space,
            size: root.size(space),
            align: root.align(space),
            members: Vec::with_capacity(fields.len()),
            fields: Vec::new(),
            padding: Vec::new(),
            runtime_stride: None,
        };

        let mut cursor = 0;
        for (i, field) in fields.iter().enumerate() {
            if let FieldType::Array { count: None, .. } = field.ty {
                if i + 1 != fields.len() {
                    tracing::warn!(
                        block = %layout.name,
                        field = %field.name,
                        "runtime-sized array must be the last member -- ignoring the rest"
                    );
                }
                let offset = round_up(cursor, field.ty.align(space));
                layout.push_padding(cursor, offset);
                layout.members.push((field.name.clone(), offset));
                layout.runtime_stride = Some(field.ty.stride(space));
                cursor = offset;
                break;
            }
            let offset = round_up(cursor, field.ty.align(space));
            layout.push_padding(cursor, offset);
            layout.members.push((field.name.clone(), offset));
            layout.flatten(&field.name, &field.ty, offset);
            cursor = offset + field.ty.size(space);
        }
        let end = layout.size.max(cursor);
        layout.push_padding(cursor, end);
        layout.size = end;
        layout
    }

    fn push_padding(&mut self, from: u32, to: u32) {
        if to > from {
            self.padding.push(Padding {
                offset: from,
                len: to - from,
            });
        }
    }

    fn flatten(&mut self, path: &str, ty: &FieldType, offset: u32) {
        match ty {
            FieldType::Array {
                element,
                count: Some(n),
            } => {
                let stride = ty.stride(self.space);
                for i in 0..*n {
                    let elem_offset = offset + i * stride;
                    self.flatten(&format!("{path}[{i}]"), element, elem_offset);
                    let used = element.size(self.space);
                    self.push_padding(elem_offset + used, elem_offset + stride);
                }
            }
            FieldType::Array { count: None, .. } => {}
            FieldType::Struct { fields, .. } => {
                let mut cursor = offset;
                for field in fields {
                    let field_offset = round_up(cursor - offset, field.ty.align(self.space)) + offset;
                    self.push_padding(cursor, field_offset);
                    self.flatten(&format!("{path}.{}", field.name), &field.ty, field_offset);
                    cursor = field_offset + field.ty.size(self.space);
                }
                let end = offset + ty.size(self.space);
                self.push_padding(cursor, end);
            }
            leaf => self.fields.push(FieldLayout {
                path: path.to_owned(),
                ty: leaf.clone(),
                offset,
            }),
        }
    }

    pub fn field(&self, path: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.path == path)
    }

    pub fn member_offset(&self, name: &str) -> Option<u32> {
        self.members
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, offset)| *offset)
    }
}

// ---------------------------------------------------------------------------
// Uniform values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            UniformValue::F32(_) => FieldType::F32,
            UniformValue::I32(_) => FieldType::I32,
            UniformValue::U32(_) => FieldType::U32,
            UniformValue::Vec2(_) => FieldType::Vec2,
            UniformValue::Vec3(_) => FieldType::Vec3,
            UniformValue::Vec4(_) => FieldType::Vec4,
            UniformValue::Mat3(_) => FieldType::Mat3,
            UniformValue::Mat4(_) => FieldType::Mat4,
        }
    }

    /// Bytes as laid out in a GPU buffer (mat3 columns padded to 16).
    fn write_to(&self, out: &mut [u8]) {
        match self {
            UniformValue::F32(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            UniformValue::I32(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            UniformValue::U32(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            UniformValue::Vec2(v) => out[..8].copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec3(v) => out[..12].copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec4(v) => out[..16].copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Mat3(m) => {
                for (i, col) in m.to_cols_array_2d().iter().enumerate() {
                    out[i * 16..i * 16 + 12].copy_from_slice(bytemuck::cast_slice(col));
                }
            }
            UniformValue::Mat4(m) => out[..64].copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
        }
    }
}

macro_rules! impl_from_uniform {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(impl From<$ty> for UniformValue {
            fn from(v: $ty) -> Self {
                UniformValue::$variant(v)
            }
        })+
    };
}

impl_from_uniform!(
    f32 => F32,
    i32 => I32,
    u32 => U32,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat3 => Mat3,
    Mat4 => Mat4,
);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniformError {
    #[error("block '{block}' has no field '{path}'")]
    UnknownField { block: String, path: String },

    #[error("field '{path}' in block '{block}' is {expected}, got {actual}")]
    TypeMismatch {
        block: String,
        path: String,
        expected: String,
        actual: String,
    },

    #[error("field '{path}' lies outside the bytes of block '{block}'")]
    OutOfBounds { block: String, path: String },
}

// ---------------------------------------------------------------------------
// HostBlock
// ---------------------------------------------------------------------------

/// CPU-side bytes for one uniform or storage block.
#[derive(Debug, Clone)]
pub struct HostBlock {
    layout: BlockLayout,
    index: HashMap<String, usize>,
    bytes: Vec<u8>,
}

impl HostBlock {
    pub fn new(layout: BlockLayout) -> Self {
        let index = layout
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.clone(), i))
            .collect();
        let bytes = vec![0; layout.size as usize];
        Self {
            layout,
            index,
            bytes,
        }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn has(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Write `value` at `path`, rejecting unknown paths and type mismatches.
    pub fn try_set(&mut self, path: &str, value: impl Into<UniformValue>) -> Result<(), UniformError> {
        let value = value.into();
        let Some(&i) = self.index.get(path) else {
            return Err(UniformError::UnknownField {
                block: self.layout.name.clone(),
                path: path.to_owned(),
            });
        };
        let field = &self.layout.fields[i];
        if field.ty != value.field_type() {
            return Err(UniformError::TypeMismatch {
                block: self.layout.name.clone(),
                path: path.to_owned(),
                expected: field.ty.to_string(),
                actual: value.field_type().to_string(),
            });
        }
        let start = field.offset as usize;
        let end = start + field.ty.size(self.layout.space) as usize;
        let Some(slot) = self.bytes.get_mut(start..end) else {
            return Err(UniformError::OutOfBounds {
                block: self.layout.name.clone(),
                path: path.to_owned(),
            });
        };
        slot.fill(0);
        value.write_to(slot);
        Ok(())
    }

    /// Like [`try_set`](Self::try_set) but logs instead of returning the
    /// error. Debug builds assert.
    pub fn set(&mut self, path: &str, value: impl Into<UniformValue>) {
        if let Err(err) = self.try_set(path, value) {
            tracing::error!(%err, "uniform write rejected");
            debug_assert!(false, "uniform write rejected: {err}");
        }
    }

    /// Set `path` only if the block declares it.
    pub fn set_if_present(&mut self, path: &str, value: impl Into<UniformValue>) {
        if self.has(path) {
            self.set(path, value);
        }
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn light() -> FieldType {
        FieldType::Struct {
            name: "Light".into(),
            fields: vec![
                Field::new("position", FieldType::Vec3),
                Field::new("intensity", FieldType::F32),
                Field::new("color", FieldType::Vec3),
            ],
        }
    }

    #[test]
    fn vec3_followed_by_scalar_packs() {
        let layout = BlockLayout::compute(
            "camera",
            &[
                Field::new("position", FieldType::Vec3),
                Field::new("near", FieldType::F32),
            ],
            AddressSpace::Uniform,
        );
        assert_eq!(layout.member_offset("near"), Some(12));
        assert_eq!(layout.size, 16);
        assert!(layout.padding.is_empty());
    }

    #[test]
    fn scalar_then_vec4_inserts_padding() {
        let layout = BlockLayout::compute(
            "material",
            &[
                Field::new("glossiness", FieldType::F32),
                Field::new("color", FieldType::Vec4),
            ],
            AddressSpace::Uniform,
        );
        assert_eq!(layout.member_offset("color"), Some(16));
        assert_eq!(layout.padding, vec![Padding { offset: 4, len: 12 }]);
        assert_eq!(layout.size, 32);
    }

    #[test]
    fn struct_array_in_uniform_space() {
        let layout = BlockLayout::compute(
            "lights",
            &[
                Field::new("items", FieldType::array(light(), 4)),
                Field::new("count", FieldType::U32),
            ],
            AddressSpace::Uniform,
        );
        // Light: position 0..12, intensity 12..16, color 16..28, size 32.
        assert_eq!(layout.field("items[1].position").unwrap().offset, 32);
        assert_eq!(layout.field("items[1].color").unwrap().offset, 48);
        assert_eq!(layout.member_offset("count"), Some(128));
        assert_eq!(layout.size, 144);
    }

    #[test]
    fn scalar_array_stride_is_16_in_uniform_but_not_storage() {
        let fields = [Field::new("weights", FieldType::array(FieldType::F32, 3))];
        let uniform = BlockLayout::compute("w", &fields, AddressSpace::Uniform);
        let storage = BlockLayout::compute("w", &fields, AddressSpace::Storage);
        assert_eq!(uniform.field("weights[2]").unwrap().offset, 32);
        assert_eq!(uniform.size, 48);
        assert_eq!(storage.field("weights[2]").unwrap().offset, 8);
        assert_eq!(storage.size, 12);
    }

    #[test]
    fn runtime_array_records_stride() {
        let layout = BlockLayout::compute(
            "instances",
            &[Field::new("models", FieldType::runtime_array(FieldType::Mat4))],
            AddressSpace::Storage,
        );
        assert_eq!(layout.runtime_stride, Some(64));
        assert_eq!(layout.size, 0);
    }

    #[test]
    fn padding_plus_fields_cover_block() {
        let layout = BlockLayout::compute(
            "lights",
            &[
                Field::new("count", FieldType::U32),
                Field::new("items", FieldType::array(light(), 2)),
            ],
            AddressSpace::Uniform,
        );
        let covered: u32 = layout
            .fields
            .iter()
            .map(|f| f.ty.size(AddressSpace::Uniform))
            .chain(layout.padding.iter().map(|p| p.len))
            .sum();
        assert_eq!(covered, layout.size);
    }

    #[test]
    fn host_block_writes_and_checks() {
        let layout = BlockLayout::compute(
            "lights",
            &[
                Field::new("items", FieldType::array(light(), 4)),
                Field::new("count", FieldType::U32),
            ],
            AddressSpace::Uniform,
        );
        let mut block = HostBlock::new(layout);
        block.try_set("items[2].color", Vec3::new(1.0, 0.5, 0.25)).unwrap();
        block.try_set("count", 3u32).unwrap();

        let off = block.layout().field("items[2].color").unwrap().offset as usize;
        assert_eq!(floats(&block.bytes()[off..off + 12]), vec![1.0, 0.5, 0.25]);

        assert!(matches!(
            block.try_set("count", 1.0f32),
            Err(UniformError::TypeMismatch { .. })
        ));
        assert!(matches!(
            block.try_set("items[4].color", Vec3::ONE),
            Err(UniformError::UnknownField { .. })
        ));
    }

    #[test]
    fn rewriting_a_field_leaves_its_packed_neighbour_intact() {
        let layout = BlockLayout::compute(
            "camera",
            &[
                Field::new("position", FieldType::Vec3),
                Field::new("near", FieldType::F32),
            ],
            AddressSpace::Uniform,
        );
        let mut block = HostBlock::new(layout);
        block.try_set("near", 0.5f32).unwrap();
        block.try_set("position", Vec3::new(1.0, 2.0, 3.0)).unwrap();
        block.try_set("position", Vec3::new(4.0, 5.0, 6.0)).unwrap();
        assert_eq!(floats(block.bytes()), vec![4.0, 5.0, 6.0, 0.5]);
    }

    #[test]
    fn mat3_columns_are_padded() {
        let layout = BlockLayout::compute(
            "n",
            &[Field::new("normal", FieldType::Mat3)],
            AddressSpace::Uniform,
        );
        let mut block = HostBlock::new(layout);
        block.try_set("normal", Mat3::from_cols(Vec3::X, Vec3::Y, Vec3::Z)).unwrap();
        let f = floats(block.bytes());
        assert_eq!(&f[0..4], &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(&f[4..8], &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(&f[8..12], &[0.0, 0.0, 1.0, 0.0]);
    }
}
