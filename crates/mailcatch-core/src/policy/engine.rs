//! Connection Policy - Decides which peers and recipients are accepted
//!
//! Recipients are matched on their lowercased address: the configured prefix
//! must lead it and one configured domain must end it. The domain test is a
//! plain suffix match, so `notexample.com` matches `example.com`.

use mailcatch_common::config::SmtpConfig;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::debug;

/// Outcome of the per-connection check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDecision {
    Accept,
    Reject(String),
}

/// Refusal of one envelope recipient
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Recipient address rejected: {address}")]
pub struct RecipientRejected {
    pub address: String,
}

/// Accept/reject rules built from the SMTP configuration
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    domains: Vec<String>,
    prefix: String,
}

impl ConnectionPolicy {
    /// Create a policy for the given domains and local-part prefix
    pub fn new<I, D>(domains: I, prefix: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = D>,
        D: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().trim().to_lowercase())
                .collect(),
            prefix: prefix.into().to_lowercase(),
        }
    }

    /// Create a policy from the SMTP configuration
    pub fn from_config(config: &SmtpConfig) -> Self {
        Self::new(&config.domains, config.prefix.clone())
    }

    /// Every connection is accepted; deny rules would hook in here.
    pub fn decide_connection(&self, peer_addr: SocketAddr) -> ConnectionDecision {
        debug!("Accepting connection from {}", peer_addr);
        ConnectionDecision::Accept
    }

    /// Accept a recipient when it carries the prefix and a configured domain suffix
    pub fn decide_recipient(&self, candidate: &str) -> Result<(), RecipientRejected> {
        let address = candidate.to_lowercase();

        let prefix_ok = address.starts_with(&self.prefix);
        let domain_ok = self
            .domains
            .iter()
            .any(|domain| address.ends_with(domain.as_str()));

        if prefix_ok && domain_ok {
            Ok(())
        } else {
            debug!(
                "Refusing recipient {} (prefix match: {}, domain match: {})",
                candidate, prefix_ok, domain_ok
            );
            Err(RecipientRejected {
                address: candidate.to_string(),
            })
        }
    }
}
