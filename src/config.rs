use anyhow::Result;
use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub preemption: PreemptionConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            preemption: PreemptionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreemptionConfig {
    /// Suspend-resume granularity: how many resource units a single
    /// preemption round may reclaim from one container.
    pub pr_number: u32,
}

impl Default for PreemptionConfig {
    fn default() -> Self {
        PreemptionConfig { pr_number: 2 }
    }
}

impl LifecycleConfig {
    pub fn from_path(path: &str) -> Result<LifecycleConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: LifecycleConfig =
            Figment::from(Serialized::defaults(LifecycleConfig::default()))
                .merge(Yaml::string(&config_str))
                .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.preemption.pr_number == 0 {
            return Err(anyhow::anyhow!("preemption.pr_number must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.preemption.pr_number, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_override() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "preemption:\n  pr_number: 4")?;

        let config = LifecycleConfig::from_path(file.path().to_str().unwrap())?;
        assert_eq!(config.preemption.pr_number, 4);
        Ok(())
    }

    #[test]
    fn test_rejects_zero_granularity() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "preemption:\n  pr_number: 0")?;

        assert!(LifecycleConfig::from_path(file.path().to_str().unwrap()).is_err());
        Ok(())
    }
}
