//! Physical quantities used to describe voxel grids.
//!
//! Microscopy voxel sizes live in the nanometre to micrometre range, so the
//! pithy constructors below work in those units.

pub use uom;
pub use uom::si::Quantity;
pub use uom::si::f32::{Length, Ratio};

mod units {
  pub use uom::si::{length::{nanometer, micrometer, millimeter},
                    ratio ::ratio,
  };
}

/// Generate a function called NAME which returns QUANTITY by interpreting its
/// argument as UNIT
///
/// wrap!(NAME QUANTITY UNIT);
macro_rules! wrap {
  ($name:ident $quantity:ident $unit:ident ) => {
    pub fn $name(x: f32) -> $quantity { $quantity::new::<units::$unit>(x) }
  };
}

wrap!(nm     Length          nanometer);
wrap!(um     Length         micrometer);
wrap!(mm     Length         millimeter);
wrap!(ratio  Ratio               ratio);

// Reverse direction of the above.
pub fn nm_(x: Length) -> f32 { x.get::<units::nanometer>() }

pub fn ratio_ (x: Ratio) -> f32 { x.get::<uom::si::ratio::ratio>() }

/// Three lengths, one per axis, in `x, y, z` order.
pub type VoxelSize = [Length; 3];

/// Voxel size with the same edge length along every axis.
pub fn isotropic(edge: Length) -> VoxelSize { [edge; 3] }

/// Per-axis ratio `a / b` of two voxel sizes.
pub fn voxel_ratio(a: VoxelSize, b: VoxelSize) -> [f32; 3] {
  [ratio_(a[0] / b[0]),
   ratio_(a[1] / b[1]),
   ratio_(a[2] / b[2])]
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;
  use float_eq::assert_float_eq;

  macro_rules! assert_uom_eq {
    ($unit:ident, $lhs:expr, $rhs:expr, $algo:ident <= $tol:expr) => {
      assert_float_eq!($lhs.get::<$unit>(), $rhs.get::<$unit>(), $algo <= $tol)
    };
  }

  #[test]
  fn nanometres_and_micrometres_agree() {
    use units::nanometer;
    assert_uom_eq!(nanometer, um(0.25), nm(250.0), ulps <= 1);
  }

  #[rstest(/**/   a   ,     b    , expected,
           case(100.0,    100.0,   1.0),
           case(200.0,    100.0,   2.0),
           case( 50.0,    200.0,   0.25),
  )]
  fn ratio_of_isotropic_sizes(a: f32, b: f32, expected: f32) {
    let r = voxel_ratio(isotropic(nm(a)), isotropic(nm(b)));
    assert_float_eq!(r, [expected; 3], ulps <= [2, 2, 2]);
  }

  #[test]
  fn lengths_parse_from_strings() {
    let l: Length = "250 nm".parse().unwrap();
    assert_float_eq!(nm_(l), 250.0, ulps <= 2);
  }
}
