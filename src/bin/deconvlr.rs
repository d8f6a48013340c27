// ----------------------------------- CLI -----------------------------------
#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "deconvlr", about = "Richardson-Lucy deconvolution of 3-D microscopy stacks")]
pub struct Cli {

    /// Run configuration (voxel sizes, iterations, ...)
    #[clap(short, long, default_value = "deconvlr-config.toml")]
    pub config: PathBuf,

    /// Observed volume: raw little-endian samples, x varying fastest
    #[clap(short = 'f', long)]
    pub input: PathBuf,

    /// Voxels in the observed volume: nx,ny,nz
    #[clap(short, long, value_parser = parse_dims)]
    pub dims: BoxDim_u,

    /// Measured PSF, same encoding as the input
    #[clap(short, long)]
    pub psf: PathBuf,

    /// Voxels in the PSF stack: px,py,pz
    #[clap(long, value_parser = parse_dims)]
    pub psf_dims: BoxDim_u,

    /// Where to write the restored volume (f32)
    #[clap(short, long)]
    pub output: PathBuf,

    /// Override the number of iterations given in the config file
    #[clap(short, long)]
    pub iterations: Option<usize>,

    /// Input and PSF hold f32 rather than u16 samples
    #[clap(long)]
    pub f32_input: bool,

    /// Maximum number of rayon threads
    #[clap(short = 'j', long, default_value = "4")]
    pub num_threads: usize,

    /// Log specification, e.g. `debug` or `info, deconvlr::solver=debug`
    #[clap(long, default_value = "info")]
    pub log_level: String,
}

// --------------------------------------------------------------------------------

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use flexi_logger::Logger;
use indicatif::{ProgressBar, ProgressStyle};

use deconvlr::config::read_config_file;
use deconvlr::deconvolver::Deconvolver;
use deconvlr::index::BoxDim_u;
use deconvlr::solver::RichardsonLucy;
use deconvlr::utils::{format_dims, group_digits, parse_dims, timing::Progress};
use deconvlr::volume::Volume;


fn main() -> Result<(), Box<dyn Error>> {

    let args = Cli::parse();
    let _logger = Logger::try_with_str(&args.log_level)?.start()?;

    match rayon::ThreadPoolBuilder::new().num_threads(args.num_threads).build_global() {
        Err(e) => log::warn!("{e}"),
        Ok(_)  => log::info!("Using up to {} threads.", args.num_threads),
    }

    let config = read_config_file(&args.config)?;
    let mut settings = config.settings()?;
    if let Some(iterations) = args.iterations {
        settings.solver = RichardsonLucy::new(iterations, settings.solver.relative_epsilon())?;
    }
    let n_iterations = settings.solver.iterations();

    let mut progress = Progress::new();
    let mut deconvolver = Deconvolver::on_host(settings);
    deconvolver.set_resolution(config.raw_voxel_size(), config.psf_voxel_size())?;
    let [nx, ny, nz] = args.dims;
    deconvolver.set_volume_size(nx, ny, nz)?;

    progress.start(&format!("Conditioning {} PSF and synthesizing OTF", format_dims(args.psf_dims)));
    if args.f32_input { deconvolver.set_psf(&Volume::<f32>::read_raw(&args.psf, args.psf_dims)?)?; }
    else              { deconvolver.set_psf(&Volume::<u16>::read_raw(&args.psf, args.psf_dims)?)?; }
    progress.done();

    progress.start("Allocating iteration buffers");
    deconvolver.initialize()?;
    progress.done();

    let bar = ProgressBar::new(n_iterations as u64);
    bar.set_style(ProgressStyle::default_bar()
                  .template("Iterating: [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta_precise})")?);
    bar.tick();

    let mut output = Volume::zeros(args.dims);
    progress.start(&format!("Deconvolving {} voxels", group_digits(nx * ny * nz)));
    let tick = |_: usize, _: &Volume<f32>| bar.inc(1);
    if args.f32_input {
        let input = Volume::<f32>::read_raw(&args.input, args.dims)?;
        deconvolver.process_with(&mut output, &input, tick)?;
    } else {
        let input = Volume::<u16>::read_raw(&args.input, args.dims)?;
        deconvolver.process_with(&mut output, &input, tick)?;
    }
    bar.finish();
    progress.done();

    if let Some(dir) = args.output.parent() { std::fs::create_dir_all(dir)?; }
    output.write_raw(&args.output)?;
    log::info!("Wrote {}", args.output.display());
    Ok(())
}
