use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A 2D raster of f64 values, row-major.
/// Missing cells are stored as NaN; reductions never read them directly,
/// they go through an [`ActiveMask`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct Grid {
    /// Row-major cell values.
    pub data: Vec<f64>,
    pub width: usize,
    pub height: usize,
}

#[derive(Deserialize)]
struct RawGrid {
    data: Vec<f64>,
    width: usize,
    height: usize,
}

impl TryFrom<RawGrid> for Grid {
    type Error = ConfigError;

    fn try_from(raw: RawGrid) -> Result<Self, ConfigError> {
        Grid::from_vec(raw.width, raw.height, raw.data)
    }
}

impl Grid {
    /// Create a new Grid filled with the given value.
    pub fn new(width: usize, height: usize, fill: f64) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
        }
    }

    /// Wrap an existing row-major buffer. Fails if the length does not match.
    pub fn from_vec(width: usize, height: usize, data: Vec<f64>) -> Result<Self, ConfigError> {
        if data.len() != width * height {
            return Err(ConfigError::ShapeMismatch {
                grid: "grid",
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f64) {
        self.data[row * self.width + col] = val;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape(&self, other_width: usize, other_height: usize) -> bool {
        self.width == other_width && self.height == other_height
    }
}

/// Catchment mask with an explicit list of active cell indices.
///
/// Every catchment-wide reduction iterates `active` only, so inactive cells
/// can hold anything (NaN, nodata sentinels) without leaking into sums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMask")]
pub struct ActiveMask {
    pub width: usize,
    pub height: usize,
    /// Row-major flat indices of active cells, ascending.
    active: Vec<usize>,
}

#[derive(Deserialize)]
struct RawMask {
    width: usize,
    height: usize,
    active: Vec<usize>,
}

impl TryFrom<RawMask> for ActiveMask {
    type Error = ConfigError;

    fn try_from(raw: RawMask) -> Result<Self, ConfigError> {
        ActiveMask::from_indices(raw.width, raw.height, raw.active)
    }
}

impl ActiveMask {
    /// Build from flat active-cell indices. They must be strictly ascending
    /// and inside the `width × height` raster.
    pub fn from_indices(
        width: usize,
        height: usize,
        active: Vec<usize>,
    ) -> Result<Self, ConfigError> {
        let cells = width * height;
        for (k, &i) in active.iter().enumerate() {
            if i >= cells || (k > 0 && active[k - 1] >= i) {
                return Err(ConfigError::InvalidMaskIndex { index: i, position: k, cells });
            }
        }
        Ok(Self { width, height, active })
    }

    /// Build from a per-cell boolean flag vector.
    pub fn from_flags(width: usize, height: usize, flags: &[bool]) -> Result<Self, ConfigError> {
        if flags.len() != width * height {
            return Err(ConfigError::ShapeMismatch {
                grid: "mask",
                expected: width * height,
                actual: flags.len(),
            });
        }
        let active = flags
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
            .collect();
        Ok(Self { width, height, active })
    }

    /// Build from a catchment-mask grid where a cell is active iff its value is 1.
    /// NaN (nodata) and any other value mark the cell as outside the catchment.
    pub fn from_grid(grid: &Grid) -> Self {
        let active = grid
            .data
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| (v == 1.0).then_some(i))
            .collect();
        Self {
            width: grid.width,
            height: grid.height,
            active,
        }
    }

    /// Every cell of a `width × height` grid active.
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            active: (0..width * height).collect(),
        }
    }

    /// Flat indices of the active cells.
    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.active
    }

    #[inline]
    pub fn n_active(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, flat: usize) -> bool {
        self.active.binary_search(&flat).is_ok()
    }

    /// Gather the active cells of `grid` into a dense vector (mask order).
    pub fn gather(&self, grid: &Grid) -> Vec<f64> {
        self.active.iter().map(|&i| grid.data[i]).collect()
    }

    /// Scatter dense per-active-cell values back onto the full raster.
    /// Inactive cells are `None`.
    pub fn scatter(&self, values: &[f64]) -> Vec<Option<f64>> {
        let mut out = vec![None; self.width * self.height];
        for (&i, &v) in self.active.iter().zip(values) {
            out[i] = Some(v);
        }
        out
    }
}
