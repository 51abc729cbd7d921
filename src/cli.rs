use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "fetal-monitor",
    version,
    about = "Live maternal/fetal ECG monitor for the ADC-BLE acquisition board"
)]
pub struct Cli {
    /// Substring of the advertised device name to connect to
    #[arg(long)]
    pub device: Option<String>,

    /// Directory for exported sample logs
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Alternate config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Overrides file settings with any values given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.device_name_filter = device.clone();
        }
        if let Some(dir) = &self.export_dir {
            config.export_dir = Some(dir.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_keeps_config() {
        let cli = Cli::try_parse_from(["fetal-monitor"]).unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "fetal-monitor",
            "--device",
            "ESP32-ECG",
            "--export-dir",
            "/tmp/ecg",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.device_name_filter, "ESP32-ECG");
        assert_eq!(config.export_dir, Some(PathBuf::from("/tmp/ecg")));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["fetal-monitor", "--rate", "20"]).is_err());
    }
}
