//! Configuration parsing and validation for decomposed runs.

use serde::{Deserialize, Serialize};
use std::fs;
use store::BoxDim;

use crate::error::{Error, Result};

/// Top-level configuration for a decomposed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompConfig {
    /// Rank grid dimensions [nx, ny, nz]
    pub grid: [usize; 3],
    /// Simulation box geometry
    pub boxdim: BoxConfig,
    /// Initial interior cut fractions along x (uniform when omitted)
    #[serde(default)]
    pub cuts_x: Option<Vec<f64>>,
    /// Initial interior cut fractions along y (uniform when omitted)
    #[serde(default)]
    pub cuts_y: Option<Vec<f64>>,
    /// Initial interior cut fractions along z (uniform when omitted)
    #[serde(default)]
    pub cuts_z: Option<Vec<f64>>,
    /// Load balancing settings
    #[serde(default)]
    pub balance: BalanceConfig,
}

/// Periodic triclinic box geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxConfig {
    /// Edge lengths [Lx, Ly, Lz]
    pub lengths: [f64; 3],
    /// Tilt factors [xy, xz, yz]
    #[serde(default)]
    pub tilts: [f64; 3],
}

/// Load balancer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Which axes the balancer may move cuts along
    #[serde(default = "default_enabled")]
    pub enabled: [bool; 3],
    /// Cap on adjustment rounds per balancing pass
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Relative tolerance on per-slab counts around the mean
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Balance every this many steps
    #[serde(default = "default_period")]
    pub period: u64,
}

// Default values
fn default_enabled() -> [bool; 3] {
    [true; 3]
}

fn default_max_iterations() -> u32 {
    8
}

fn default_tolerance() -> f64 {
    0.05
}

fn default_period() -> u64 {
    1
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            period: default_period(),
        }
    }
}

impl DecompConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: DecompConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.grid.iter().any(|&n| n == 0) {
            return Err(Error::Config(format!(
                "rank grid dimensions must be positive, got {:?}",
                self.grid
            )));
        }
        if self.boxdim.lengths.iter().any(|&l| !l.is_finite() || l <= 0.0) {
            return Err(Error::Config(format!(
                "box edge lengths must be positive and finite, got {:?}",
                self.boxdim.lengths
            )));
        }
        if self.boxdim.tilts.iter().any(|t| !t.is_finite()) {
            return Err(Error::Config(format!(
                "box tilt factors must be finite, got {:?}",
                self.boxdim.tilts
            )));
        }

        for (axis, cuts) in [&self.cuts_x, &self.cuts_y, &self.cuts_z]
            .into_iter()
            .enumerate()
        {
            let Some(cuts) = cuts else { continue };
            if cuts.len() != self.grid[axis] - 1 {
                return Err(Error::Config(format!(
                    "axis {axis} needs {} interior cuts for a grid of {}, got {}",
                    self.grid[axis] - 1,
                    self.grid[axis],
                    cuts.len()
                )));
            }
            let mut prev = 0.0;
            for &c in cuts {
                if !c.is_finite() || c <= prev || c >= 1.0 {
                    return Err(Error::Config(format!(
                        "axis {axis} cut fractions must be strictly increasing inside (0,1): {cuts:?}"
                    )));
                }
                prev = c;
            }
        }

        if self.balance.max_iterations == 0 {
            return Err(Error::Config(
                "balance.max_iterations must be at least 1".to_string(),
            ));
        }
        if !self.balance.tolerance.is_finite() || self.balance.tolerance < 0.0 {
            return Err(Error::Config(format!(
                "balance.tolerance must be non-negative, got {}",
                self.balance.tolerance
            )));
        }
        if self.balance.period == 0 {
            return Err(Error::Config(
                "balance.period must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Initial interior cuts in per-axis array form.
    pub fn initial_cuts(&self) -> [Option<Vec<f64>>; 3] {
        [self.cuts_x.clone(), self.cuts_y.clone(), self.cuts_z.clone()]
    }
}

impl BoxConfig {
    /// Construct the box this configuration describes.
    pub fn to_boxdim(&self) -> BoxDim {
        let [xy, xz, yz] = self.tilts;
        BoxDim::new(self.lengths, xy, xz, yz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DecompConfig {
        DecompConfig {
            grid: [2, 2, 2],
            boxdim: BoxConfig {
                lengths: [2.0, 2.0, 2.0],
                tilts: [0.0; 3],
            },
            cuts_x: None,
            cuts_y: None,
            cuts_z: None,
            balance: BalanceConfig::default(),
        }
    }

    #[test]
    fn defaults_fill_in_from_minimal_json() {
        let config: DecompConfig = serde_json::from_str(
            r#"{"grid": [1, 2, 4], "boxdim": {"lengths": [2.0, 2.0, 2.0]}}"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.balance.enabled, [true; 3]);
        assert_eq!(config.balance.max_iterations, 8);
        assert_eq!(config.balance.period, 1);
        assert!(config.cuts_z.is_none());
        assert_eq!(config.boxdim.tilts, [0.0; 3]);
    }

    #[test]
    fn validation_rejects_bad_grid() {
        let mut config = base_config();
        config.grid = [2, 0, 2];
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_cuts() {
        let mut config = base_config();
        config.cuts_z = Some(vec![0.25, 0.75]);
        assert!(config.validate().is_err(), "wrong cut count for a 2-grid");

        config.cuts_z = Some(vec![1.5]);
        assert!(config.validate().is_err(), "cut outside (0,1)");

        config.cuts_z = Some(vec![0.75]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_degenerate_box() {
        let mut config = base_config();
        config.boxdim.lengths = [2.0, -1.0, 2.0];
        assert!(config.validate().is_err());

        config.boxdim.lengths = [2.0, 2.0, 2.0];
        config.boxdim.tilts = [f64::NAN, 0.0, 0.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_balance_settings() {
        let mut config = base_config();
        config.balance.max_iterations = 0;
        assert!(config.validate().is_err());

        config.balance.max_iterations = 8;
        config.balance.period = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn boxdim_carries_lengths_and_tilts() {
        let config: DecompConfig = serde_json::from_str(
            r#"{"grid": [1, 1, 2],
                "boxdim": {"lengths": [2.0, 3.0, 4.0], "tilts": [0.1, 0.2, 0.3]}}"#,
        )
        .unwrap();
        let b = config.boxdim.to_boxdim();
        assert_eq!(b.length(0), 2.0);
        assert_eq!(b.length(1), 3.0);
        assert_eq!(b.length(2), 4.0);
    }
}
