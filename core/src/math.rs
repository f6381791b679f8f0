//! Engine math value types.
//!
//! Vectors are the `glam` types. Matrices use [`Float4x4`], which is stored
//! row-major the way engine code builds them; shader-side constant buffers
//! are column-major, so the binding layer transposes on upload.

use bytemuck::{Pod, Zeroable};

pub use glam::{IVec2, IVec3, IVec4, Mat4, UVec2, UVec3, UVec4, Vec2, Vec3, Vec4};

/// Row-major 4x4 float matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Float4x4 {
    rows: [[f32; 4]; 4],
}

impl Float4x4 {
    /// The identity matrix.
    pub const IDENTITY: Self = Self::from_rows([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    /// All zeros.
    pub const ZERO: Self = Self::from_rows([[0.0; 4]; 4]);

    /// Build from four rows.
    pub const fn from_rows(rows: [[f32; 4]; 4]) -> Self {
        Self { rows }
    }

    /// Build from 16 floats in row-major order.
    pub fn from_row_major_slice(values: &[f32; 16]) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (i, row) in rows.iter_mut().enumerate() {
            row.copy_from_slice(&values[i * 4..i * 4 + 4]);
        }
        Self { rows }
    }

    /// Row `index`.
    pub fn row(&self, index: usize) -> [f32; 4] {
        self.rows[index]
    }

    /// Column `index`.
    pub fn column(&self, index: usize) -> [f32; 4] {
        [
            self.rows[0][index],
            self.rows[1][index],
            self.rows[2][index],
            self.rows[3][index],
        ]
    }

    /// Element at (`row`, `column`).
    pub fn get(&self, row: usize, column: usize) -> f32 {
        self.rows[row][column]
    }

    /// All rows.
    pub fn rows(&self) -> &[[f32; 4]; 4] {
        &self.rows
    }

    /// Transposed copy.
    pub fn transpose(&self) -> Self {
        Self::from_rows([self.column(0), self.column(1), self.column(2), self.column(3)])
    }

    /// Matrix product `self * rhs`.
    pub fn mul(&self, rhs: &Self) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = (0..4).map(|k| self.rows[r][k] * rhs.rows[k][c]).sum();
            }
        }
        Self { rows }
    }

    /// Flatten to 16 floats in row-major order.
    pub fn to_row_major_array(&self) -> [f32; 16] {
        bytemuck::cast(self.rows)
    }
}

impl Default for Float4x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Mat4> for Float4x4 {
    fn from(m: Mat4) -> Self {
        // glam stores columns; its column arrays are our rows transposed.
        Self::from_rows(m.to_cols_array_2d()).transpose()
    }
}

impl From<Float4x4> for Mat4 {
    fn from(m: Float4x4) -> Self {
        Mat4::from_cols_array_2d(&m.transpose().rows)
    }
}
