use itertools::Itertools;

use crate::index::BoxDim_u;

/// Parse `"nx,ny,nz"` into volume dimensions
pub fn parse_dims(s: &str) -> Result<BoxDim_u, String> {
    let (x, y, z) = s.split(',')
        .map(str::trim)
        .collect_tuple()
        .ok_or_else(|| format!("expected three comma-separated numbers, got `{s}`"))?;
    let parse = |v: &str| v.parse::<usize>().map_err(|e| format!("`{v}` in `{s}`: {e}"));
    Ok([parse(x)?, parse(y)?, parse(z)?])
}

/// `[64, 64, 32]` -> `"64×64×32"`
pub fn format_dims(dims: BoxDim_u) -> String { dims.iter().join("×") }

/// Group numeric digits to facilitate reading long numbers
pub fn group_digits<F: std::fmt::Display>(n: F) -> String {
    use numsep::{separate, Locale};
    separate(n, Locale::English)
}


pub mod timing {

    use super::group_digits;
    use std::time::Instant;

    /// Logs how long each stage of a run takes
    pub struct Progress {
        previous: Instant,
        stage: Option<String>,
    }

    impl Progress {

        #[allow(clippy::new_without_default)]
        pub fn new() -> Self { Self { previous: Instant::now(), stage: None } }

        /// Announce a stage and start its timer
        pub fn start(&mut self, message: &str) {
            log::info!("{message} ...");
            self.stage = Some(message.to_string());
            self.previous = Instant::now();
        }

        /// Log the time elapsed since the last `start`
        pub fn done(&mut self) {
            let ms = group_digits(self.previous.elapsed().as_millis());
            match self.stage.take() {
                Some(stage) => log::info!("{stage}: {ms} ms"),
                None        => log::info!("done in {ms} ms"),
            }
            self.previous = Instant::now();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest(/**/ input        , expected     ,
             case("256,256,64" , [256, 256, 64]),
             case("1, 2, 3"    , [  1,   2,  3]),
    )]
    fn dims_are_parsed(input: &str, expected: BoxDim_u) {
        assert_eq!(parse_dims(input), Ok(expected));
    }

    #[rstest(input, case("256,256"), case("1,2,3,4"), case("a,b,c"), case("-1,2,3"))]
    fn bad_dims_are_rejected(input: &str) {
        assert!(parse_dims(input).is_err());
    }

    #[test]
    fn dims_are_formatted() {
        assert_eq!(format_dims([64, 32, 8]), "64×32×8");
    }
}
