use std::{fmt, str::FromStr};
use thiserror::Error;

/// Execution slot a detection model is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accelerator {
    Cpu,
    Gpu(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid accelerator `{0}` (expected `cpu`, `gpu:N`, `cuda:N` or `N`)")]
pub struct ParseAcceleratorError(String);

impl FromStr for Accelerator {
    type Err = ParseAcceleratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        if normalized == "cpu" {
            return Ok(Accelerator::Cpu);
        }

        let index = normalized
            .strip_prefix("gpu:")
            .or_else(|| normalized.strip_prefix("cuda:"))
            .unwrap_or(&normalized);

        index
            .parse()
            .map(Accelerator::Gpu)
            .map_err(|_| ParseAcceleratorError(s.to_string()))
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accelerator::Cpu => f.write_str("cpu"),
            Accelerator::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}

/// Parse a comma separated accelerator list such as `0,1` or `cpu`.
///
/// Blank entries are skipped; an empty list yields `[Cpu]`.
pub fn parse_accelerators(list: &str) -> Result<Vec<Accelerator>, ParseAcceleratorError> {
    let parsed = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<_>, _>>()?;

    if parsed.is_empty() {
        Ok(vec![Accelerator::Cpu])
    } else {
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_spellings() {
        assert_eq!("cpu".parse::<Accelerator>(), Ok(Accelerator::Cpu));
        assert_eq!(" CPU ".parse::<Accelerator>(), Ok(Accelerator::Cpu));
        assert_eq!("0".parse::<Accelerator>(), Ok(Accelerator::Gpu(0)));
        assert_eq!("gpu:1".parse::<Accelerator>(), Ok(Accelerator::Gpu(1)));
        assert_eq!("cuda:3".parse::<Accelerator>(), Ok(Accelerator::Gpu(3)));
    }

    #[test]
    fn rejects_unknown_spellings() {
        assert!("tpu".parse::<Accelerator>().is_err());
        assert!("gpu:".parse::<Accelerator>().is_err());
        assert!("-1".parse::<Accelerator>().is_err());
    }

    #[test]
    fn display_is_parseable() {
        for acc in [Accelerator::Cpu, Accelerator::Gpu(2)] {
            assert_eq!(acc.to_string().parse::<Accelerator>(), Ok(acc));
        }
    }

    #[test]
    fn parses_lists() {
        assert_eq!(
            parse_accelerators("0, 1,,cpu"),
            Ok(vec![
                Accelerator::Gpu(0),
                Accelerator::Gpu(1),
                Accelerator::Cpu
            ])
        );
        assert_eq!(parse_accelerators(""), Ok(vec![Accelerator::Cpu]));
        assert!(parse_accelerators("0,x").is_err());
    }
}
