// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! DNS lookups through the operating system's resolver.
//!
//! Lock verification deliberately bypasses the provider adapters: a lock is
//! only as good as what the world actually resolves. [`NameResolver`] is the
//! seam the engine consumes; [`SystemResolver`] is the hickory-backed
//! implementation using the system resolv.conf, and tests plug in scripted
//! resolvers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;

/// Resolver interface used for lock refresh and hostname-target resolution.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve all TXT strings published on `name`.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;

    /// Resolve `name` to its addresses (A and AAAA).
    async fn lookup_addrs(&self, name: &str) -> Result<Vec<IpAddr>>;
}

/// [`NameResolver`] backed by the OS resolver configuration.
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    /// Build from `/etc/resolv.conf` (or platform equivalent).
    ///
    /// # Errors
    ///
    /// Fails when the system resolver configuration cannot be read.
    pub fn from_system_conf() -> Result<Self> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()
            .context("reading system resolver configuration")?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl NameResolver for SystemResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        let lookup = self
            .inner
            .txt_lookup(name.to_string())
            .await
            .with_context(|| format!("TXT lookup for {name}"))?;
        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect::<String>()
            })
            .collect())
    }

    async fn lookup_addrs(&self, name: &str) -> Result<Vec<IpAddr>> {
        let lookup = self
            .inner
            .lookup_ip(name.to_string())
            .await
            .with_context(|| format!("address lookup for {name}"))?;
        Ok(lookup.iter().collect())
    }
}
