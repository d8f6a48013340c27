use deconvlr::{Deconvolver, HostDevice, RichardsonLucy, Settings, Volume};
use deconvlr::fft::FftPlans;
use deconvlr::index::{BoxDim_u, half_spectrum, shape_zyx};
use deconvlr::kernels::multiply_otf;
use deconvlr::otf::template_spectrum;
use deconvlr::psf::{condition, geometric_center};
use float_eq::assert_float_eq;
use ndarray::Array3;
use units::{nm, isotropic};

const N: usize = 64;
const DIMS: BoxDim_u = [N, N, N];

fn gaussian(centre: [f64; 3], sigma: f64) -> impl Fn([usize; 3]) -> f32 {
    move |[x, y, z]| {
        let d2 = (x as f64 - centre[0]).powi(2)
               + (y as f64 - centre[1]).powi(2)
               + (z as f64 - centre[2]).powi(2);
        (-d2 / (2.0 * sigma * sigma)).exp() as f32
    }
}

/// A few bright blobs on a uniform positive background
fn ground_truth() -> Volume<f32> {
    let blobs = [
        gaussian([20.0, 22.0, 30.0], 2.0),
        gaussian([40.0, 35.0, 28.0], 1.5),
        gaussian([30.0, 45.0, 40.0], 2.5),
        gaussian([45.0, 15.0, 20.0], 1.0),
    ];
    let amplitudes = [100.0, 80.0, 60.0, 120.0];
    Volume::from_fn(DIMS, |p| {
        10.0 + blobs.iter().zip(amplitudes).map(|(blob, a)| a * blob(p)).sum::<f32>()
    })
}

fn gaussian_psf(dims: BoxDim_u, sigma: f64) -> Volume<f32> {
    let centre = geometric_center(dims).map(|c| c as f64);
    Volume::from_fn(dims, gaussian(centre, sigma))
}

/// Circular convolution of `truth` with a PSF sampled on the same grid
fn blur(truth: &Volume<f32>, psf: &Volume<f32>) -> Volume<f32> {
    let h = template_spectrum(&condition(psf.clone()).unwrap()).unwrap();
    let plans = FftPlans::new(DIMS).unwrap();
    let mut spectrum = Array3::zeros(shape_zyx(half_spectrum(DIMS)));
    plans.forward(truth.array().view(), spectrum.view_mut()).unwrap();
    multiply_otf(spectrum.view_mut(), h.view());
    let mut blurred = Volume::zeros(DIMS);
    plans.inverse(spectrum.view_mut(), blurred.view_mut()).unwrap();
    blurred
}

fn mse(a: &Volume<f32>, b: &Volume<f32>) -> f64 {
    a.data().iter().zip(b.data())
        .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
        .sum::<f64>() / a.len() as f64
}

fn ready(settings: Settings, psf: &Volume<f32>, raw_nm: f32, psf_nm: f32) -> Deconvolver {
    let mut d = Deconvolver::new(HostDevice::new(), settings);
    d.set_resolution(isotropic(nm(raw_nm)), isotropic(nm(psf_nm))).unwrap();
    d.set_volume_size(N, N, N).unwrap();
    d.set_psf(psf).unwrap();
    d.initialize().unwrap();
    d
}

#[test]
fn iterations_approach_the_ground_truth() {
    let truth = ground_truth();
    let psf = gaussian_psf(DIMS, 1.5);
    let observed = blur(&truth, &psf);

    let settings = Settings { solver: RichardsonLucy::new(10, 1e-6).unwrap(), ..Settings::default() };
    let mut d = ready(settings, &psf, 100.0, 100.0);
    let mut errors = vec![];
    let mut output = Volume::zeros(DIMS);
    d.process_with(&mut output, &observed, |_, estimate| errors.push(mse(estimate, &truth))).unwrap();

    let blurred = mse(&observed, &truth);
    assert_eq!(errors.len(), 10);
    assert!(errors[9] < blurred, "MSE {} after 10 iterations, {} before", errors[9], blurred);
    assert!(errors[9] <= errors[4] * (1.0 + 1e-3), "MSE went from {} (5) to {} (10)", errors[4], errors[9]);
    assert_float_eq!(mse(&output, &truth), errors[9], rmax <= 1e-9);
}

#[test]
fn estimates_stay_non_negative_and_keep_total_intensity() {
    let truth = ground_truth();
    let psf = gaussian_psf(DIMS, 1.5);
    let observed = blur(&truth, &psf);
    let mut d = ready(Settings::default(), &psf, 100.0, 100.0);
    let mut output = Volume::zeros(DIMS);
    d.process(&mut output, &observed).unwrap();
    assert!(output.data().iter().all(|v| v.is_finite() && *v >= 0.0));
    // With a unit-gain OTF, Richardson-Lucy preserves the total flux
    let total = |v: &Volume<f32>| v.data().iter().map(|&x| x as f64).sum::<f64>();
    assert_float_eq!(total(&output), total(&observed), rmax <= 1e-3);
}

// An impulse PSF has a flat OTF whatever grid it was sampled on, so the
// observation must come back unchanged.
#[test]
fn impulse_psf_on_a_finer_grid_is_the_identity() {
    let truth = ground_truth();
    let mut psf = Volume::<u16>::zeros([16, 16, 16]);
    psf[[8, 8, 8]] = 1000;
    let mut d = Deconvolver::on_host(Settings::default());
    d.set_resolution(isotropic(nm(100.0)), isotropic(nm(50.0))).unwrap();
    d.set_volume_size(N, N, N).unwrap();
    d.set_psf(&psf).unwrap();
    d.initialize().unwrap();
    let mut output = Volume::zeros(DIMS);
    d.process(&mut output, &truth).unwrap();
    for (&a, &b) in truth.data().iter().zip(output.data()) {
        assert_float_eq!(a, b, rmax <= 1e-3);
    }
}

#[test]
fn u16_stacks_through_raw_files() {
    let dir = tempfile::tempdir().unwrap();
    let truth = ground_truth();
    let psf = gaussian_psf(DIMS, 1.5);
    let observed = blur(&truth, &psf);
    let counts = Volume::from_fn(DIMS, |p| observed[p].round() as u16);

    let input_path  = dir.path().join("observed.raw");
    let output_path = dir.path().join("restored.raw");
    counts.write_raw(&input_path).unwrap();
    let input = Volume::<u16>::read_raw(&input_path, DIMS).unwrap();
    assert_eq!(input, counts);

    let mut d = ready(Settings::default(), &psf, 100.0, 100.0);
    let mut output = Volume::zeros(DIMS);
    d.process(&mut output, &input).unwrap();
    output.write_raw(&output_path).unwrap();

    let restored = Volume::<f32>::read_raw(&output_path, DIMS).unwrap();
    assert_eq!(restored, output);
    assert!(mse(&restored, &truth) < mse(&Volume::from(&counts), &truth));
}
