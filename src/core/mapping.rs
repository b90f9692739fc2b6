use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::core::{context::MultiMap, name_table::NameTable};

pub const GROUP_PARAM: &str = "group";
pub const VERSION_PARAM: &str = "version";

/// Number of path segments a routable request carries: `["", app, service, method]`.
const ROUTABLE_SEGMENTS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MappingError {
    /// Path does not have the `/{application}/{service}/{method}` shape
    #[error("expected {expected} path segments, got {count}")]
    IllegalSegments { expected: usize, count: usize },

    /// One of the application, service or method segments is empty
    #[error("empty {0} segment")]
    EmptySegment(&'static str),
}

/// Routing identity of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMapping {
    pub application: String,
    pub service: String,
    pub method: String,
    pub group: Option<String>,
    pub version: Option<String>,
    /// Internal service name the RPC layer addresses.
    pub service_name: String,
}

impl fmt::Display for ServiceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(group) = &self.group {
            write!(f, "{group}/")?;
        }
        write!(f, "{}.{}", self.service_name, self.method)?;
        if let Some(version) = &self.version {
            write!(f, ":{version}")?;
        }
        Ok(())
    }
}

/// Turns request path segments into a [`ServiceMapping`].
#[derive(Debug, Clone)]
pub struct ServiceMappingResolver {
    names: Arc<NameTable>,
    default_group: Option<String>,
    default_version: Option<String>,
}

impl ServiceMappingResolver {
    pub fn new(names: Arc<NameTable>) -> Self {
        Self {
            names,
            default_group: None,
            default_version: None,
        }
    }

    pub fn with_defaults(mut self, group: Option<String>, version: Option<String>) -> Self {
        self.default_group = group.filter(|g| !g.is_empty());
        self.default_version = version.filter(|v| !v.is_empty());
        self
    }

    /// Resolve `paths` (relative to the gateway application) and query
    /// `parameters` into a mapping.
    ///
    /// `group` and `version` parameters only override the defaults when they
    /// are present and non-empty. A service with no name table entry resolves
    /// to its own token.
    pub fn resolve(
        &self,
        paths: &[String],
        parameters: &MultiMap,
    ) -> Result<ServiceMapping, MappingError> {
        if paths.len() != ROUTABLE_SEGMENTS {
            return Err(MappingError::IllegalSegments {
                expected: ROUTABLE_SEGMENTS,
                count: paths.len(),
            });
        }

        let application = non_empty(&paths[1], "application")?;
        let service = non_empty(&paths[2], "service")?;
        let method = non_empty(&paths[3], "method")?;

        let group = param(parameters, GROUP_PARAM).or_else(|| self.default_group.clone());
        let version = param(parameters, VERSION_PARAM).or_else(|| self.default_version.clone());

        let service_name = self
            .names
            .resolve(application, service)
            .unwrap_or_else(|| service.to_string());

        Ok(ServiceMapping {
            application: application.to_string(),
            service: service.to_string(),
            method: method.to_string(),
            group,
            version,
            service_name,
        })
    }
}

fn non_empty<'a>(segment: &'a str, what: &'static str) -> Result<&'a str, MappingError> {
    if segment.is_empty() {
        Err(MappingError::EmptySegment(what))
    } else {
        Ok(segment)
    }
}

fn param(parameters: &MultiMap, key: &str) -> Option<String> {
    parameters
        .get(key)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
