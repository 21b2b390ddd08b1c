//! Request-side configuration: facility map and parsed templates.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::template::{DestinationTemplate, GroupTemplate, TemplateError};

/// Configuration for the transfer orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Facility name -> transfer-service collection id.
    pub facilities: BTreeMap<String, String>,
    /// Group a caller needs on the source facility.
    pub source_group: GroupTemplate,
    /// Group a caller needs on the destination facility.
    pub destination_group: GroupTemplate,
    pub destination_path: DestinationTemplate,
}

impl OrchestratorConfig {
    /// Parse the template strings of a loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, TemplateError> {
        Ok(Self {
            facilities: config.facilities.clone(),
            source_group: GroupTemplate::parse(&config.templates.source_group)?,
            destination_group: GroupTemplate::parse(&config.templates.destination_group)?,
            destination_path: DestinationTemplate::parse(&config.templates.destination_path)?,
        })
    }

    /// Collection id of a facility.
    pub fn collection(&self, facility: &str) -> Option<&str> {
        self.facilities.get(facility).map(String::as_str)
    }
}
