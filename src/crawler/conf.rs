use crate::engine::EngineParams;
use serde::{Deserialize, Serialize};
use std::{fs, time};

/// Configuration values obtained parsing the configuration file.
#[derive(Debug, Serialize, Deserialize)]
pub struct Conf {
    pub log_level: log::Level,
    pub engine: EngineConf,
    pub batch: BatchConf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineConf {
    pub max_cached_queries: Option<usize>,
    pub max_concurrent_requests: usize,
    pub max_requests_per_nameserver_second: usize,
    pub max_requests_per_tld_nameserver_second: usize,
    pub request_timeout: u64,
    pub timeout_multiplier: f64,
    pub max_timeout: u64,
    pub request_retries: usize,
    pub ipv4_only: bool,
    pub tld_nameserver_ips_file: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchConf {
    pub crawl_threads: usize,
    pub graph_format: String,
}

impl Conf {
    /// Read and parse the configuration values from a file. The file must
    /// be JSON-encoded and follow the organization of the [Conf] struct.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let file_bytes = match fs::read_to_string(path) {
            Err(err) => return Err(err.to_string()),
            Ok(v) => v,
        };
        let conf = match serde_json::from_str::<Conf>(&file_bytes) {
            Err(err) => return Err(err.to_string()),
            Ok(conf) => conf,
        };
        match conf.validate() {
            Ok(_) => Ok(conf),
            Err(err) => Err(err),
        }
    }

    /// Validate a configuration struct against some common errors.
    fn validate(&self) -> Result<(), String> {
        // Engine confs.
        if let Some(cached) = self.engine.max_cached_queries {
            if cached == 0 {
                return Err("invalid 'max_cached_queries' engine param: cannot be 0".to_string());
            }
        }
        if self.engine.max_concurrent_requests == 0 {
            return Err("invalid 'max_concurrent_requests' engine param: cannot be 0".to_string());
        }
        if self.engine.max_requests_per_nameserver_second == 0 {
            return Err("invalid 'max_requests_per_nameserver_second' engine param: cannot be 0".to_string());
        }
        if self.engine.max_requests_per_tld_nameserver_second == 0 {
            return Err("invalid 'max_requests_per_tld_nameserver_second' engine param: cannot be 0".to_string());
        }
        if self.engine.request_timeout == 0 {
            return Err("invalid engine request timeout: cannot be 0 seconds".to_string());
        }
        if self.engine.timeout_multiplier < 1.0 {
            return Err("invalid 'timeout_multiplier' engine param: cannot be < 1".to_string());
        }
        if self.engine.max_timeout < self.engine.request_timeout {
            return Err("invalid 'max_timeout' engine param: below the base timeout".to_string());
        }

        // Batch confs.
        if self.batch.crawl_threads == 0 {
            return Err("invalid 'crawl_threads' batch param: cannot be 0".to_string());
        }
        if self.batch.graph_format != "rdf" && self.batch.graph_format != "json" {
            return Err(format!("invalid 'graph_format' batch param: '{}'", self.batch.graph_format));
        }

        Ok(())
    }
}

impl EngineConf {
    /// Collect the engine configuration values into engine parameters.
    pub fn to_params(&self) -> EngineParams {
        EngineParams {
            max_cached_queries: self.max_cached_queries,
            max_concurrent_requests: self.max_concurrent_requests,
            max_requests_per_nameserver_second: self.max_requests_per_nameserver_second,
            max_requests_per_tld_nameserver_second: self.max_requests_per_tld_nameserver_second,
            request_timeout: time::Duration::new(self.request_timeout, 0),
            timeout_multiplier: self.timeout_multiplier,
            max_timeout: time::Duration::new(self.max_timeout, 0),
            request_retries: self.request_retries,
            ipv4_only: self.ipv4_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_conf() -> Conf {
        serde_json::from_str(
            r#"{
                "log_level": "INFO",
                "engine": {
                    "max_cached_queries": 4096,
                    "max_concurrent_requests": 96,
                    "max_requests_per_nameserver_second": 10,
                    "max_requests_per_tld_nameserver_second": 100,
                    "request_timeout": 2,
                    "timeout_multiplier": 2.0,
                    "max_timeout": 16,
                    "request_retries": 2,
                    "ipv4_only": false,
                    "tld_nameserver_ips_file": null
                },
                "batch": {
                    "crawl_threads": 8,
                    "graph_format": "rdf"
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_conf_passes() {
        let conf = sample_conf();
        assert!(conf.validate().is_ok());
        let params = conf.engine.to_params();
        assert_eq!(params.request_timeout, time::Duration::new(2, 0));
        assert_eq!(params.max_cached_queries, Some(4096));
    }

    #[test]
    fn test_invalid_confs_are_rejected() {
        let mut conf = sample_conf();
        conf.engine.max_concurrent_requests = 0;
        assert!(conf.validate().is_err());

        let mut conf = sample_conf();
        conf.engine.max_timeout = 1;
        assert!(conf.validate().is_err());

        let mut conf = sample_conf();
        conf.batch.graph_format = "xml".to_string();
        assert!(conf.validate().is_err());
    }
}
