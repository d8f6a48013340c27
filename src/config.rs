//! Configuration file parser for deconvolution runs

use std::fs;
use std::str::FromStr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, de};

use units::{Length, VoxelSize};

use crate::deconvolver::Settings;
use crate::error::Result;
use crate::otf::OutOfSupport;
use crate::solver::RichardsonLucy;

fn deserialize_uom_3d<'d, D, T>(deserializer: D) -> std::result::Result<[T; 3], D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let (x, y, z) = <(&str, &str, &str)>::deserialize(deserializer)?;
    tr_tup_res((x.parse(), y.parse(), z.parse()))
        .map(|(x, y, z)| [x, y, z])
        .map_err(de::Error::custom)
}

/// Transpose 3-tuple of `Result`
///
/// `Ok` if all elements `Ok`; if any element is an `Err` return the first one.
fn tr_tup_res<O, E>((x,y,z): (std::result::Result<O, E>, std::result::Result<O, E>, std::result::Result<O, E>))
    -> std::result::Result<(O, O, O), E>
{
    Ok((x?, y?, z?))
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {

    /// Number of Richardson-Lucy iterations
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Guard threshold of the ratio step, relative to the brightest observed voxel
    #[serde(default = "default_relative_epsilon")]
    pub relative_epsilon: f32,

    #[serde(default)]
    pub out_of_support: OutOfSupport,

    /// Directory for the aligned PSF and OTF magnitude
    #[serde(default)]
    pub diagnostics: Option<PathBuf>,

    pub voxel_size: VoxelSizes,
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VoxelSizes {
    #[serde(deserialize_with = "deserialize_uom_3d")]
    pub raw: [Length; 3],
    #[serde(deserialize_with = "deserialize_uom_3d")]
    pub psf: [Length; 3],
}

fn default_iterations() -> usize { 10 }
fn default_relative_epsilon() -> f32 { 1e-6 }

impl Config {

    /// Solver and synthesis settings, validated
    pub fn settings(&self) -> Result<Settings> {
        Ok(Settings {
            solver: RichardsonLucy::new(self.iterations, self.relative_epsilon)?,
            out_of_support: self.out_of_support,
            diagnostics: self.diagnostics.clone(),
        })
    }

    pub fn raw_voxel_size(&self) -> VoxelSize { self.voxel_size.raw }
    pub fn psf_voxel_size(&self) -> VoxelSize { self.voxel_size.psf }
}

impl FromStr for Config {
    type Err = crate::error::DeconvError;
    fn from_str(s: &str) -> Result<Self> { Ok(toml::from_str(s)?) }
}

pub fn read_config_file(path: &Path) -> Result<Config> {
    let config: String = fs::read_to_string(path)?;
    config.parse()
}
