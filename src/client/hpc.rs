//! Batch scheduler access
//!
//! This module provides the scheduler abstraction used by reconciliation and
//! resubmission, together with the HTCondor command-line implementation.

pub mod common;
pub mod condor_interface;
pub mod scheduler_interface;

pub use common::{JobAction, SchedulerRecord};
pub use condor_interface::CondorInterface;
pub use scheduler_interface::SchedulerInterface;

use crate::config::ProdConfig;

/// Build one scheduler handle per configured schedd, or the local schedd when no
/// collectors are configured.
pub fn create_scheduler_interfaces(config: &ProdConfig) -> Vec<Box<dyn SchedulerInterface>> {
    if config.collectors.is_empty() {
        return vec![Box::new(CondorInterface::local())];
    }
    let mut interfaces: Vec<Box<dyn SchedulerInterface>> = Vec::new();
    for collector in config.collectors.values() {
        let pool = (!collector.address.is_empty()).then(|| collector.address.clone());
        for schedd in &collector.schedds {
            interfaces.push(Box::new(CondorInterface::new(
                Some(schedd.clone()),
                pool.clone(),
            )));
        }
    }
    interfaces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;

    #[test]
    fn test_local_scheduler_when_no_collectors() {
        let interfaces = create_scheduler_interfaces(&ProdConfig::default());
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].name(), "local");
    }

    #[test]
    fn test_one_interface_per_schedd() {
        let mut config = ProdConfig::default();
        config.collectors.insert(
            "fnal".to_string(),
            CollectorConfig {
                address: "collector.example.org".to_string(),
                schedds: vec!["schedd1".to_string(), "schedd2".to_string()],
            },
        );
        let interfaces = create_scheduler_interfaces(&config);
        let names: Vec<&str> = interfaces.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["schedd1", "schedd2"]);
    }
}
