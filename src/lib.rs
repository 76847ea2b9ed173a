// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # dnsman - Declarative DNS Controller for Kubernetes
//!
//! dnsman is a Kubernetes controller written in Rust that reconciles
//! declarative DNS objects against external DNS hosting providers (cloud
//! providers and registrars) through a uniform adapter interface.
//!
//! ## Overview
//!
//! This library provides the core functionality for the dnsman controller,
//! including:
//!
//! - Custom Resource Definitions (CRDs) for DNS entries, providers, owners
//!   and locks
//! - The entry reconciliation state engine: provider/zone premise
//!   resolution, deterministic duplicate arbitration, finalizer-ordered
//!   deletion and batched zone-level change application
//! - The DNS-lock protocol: TXT-record based cross-cluster mutual exclusion
//!   with timestamp arbitration
//! - The provider adapter interface with a bundled in-memory back-end
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`state`] - the reconciliation state engine
//! - [`provider`] - the provider adapter interface and factory
//! - [`reconcilers`] - controller-side reconcilers per resource type
//! - [`dns`] - the uniform record-set vocabulary
//!
//! ## Example
//!
//! ```rust,no_run
//! use dnsman::crd::DNSEntrySpec;
//!
//! // Declare an A record for www.example.com
//! let spec = DNSEntrySpec {
//!     dns_name: "www.example.com".to_string(),
//!     targets: vec!["1.2.3.4".to_string()],
//!     text: vec![],
//!     ttl: Some(300),
//!     owner_id: None,
//!     provider_type: None,
//!     cname_lookup_interval: None,
//! };
//! ```
//!
//! ## Features
//!
//! - **Multi-Provider** - one controller reconciles records across many
//!   back-ends simultaneously
//! - **Deterministic Arbitration** - contested DNS names resolve to the
//!   earliest claim, with a stable tie-break
//! - **Safe Deletion** - finalizers guarantee no provider record is ever
//!   orphaned
//! - **Status Tracking** - full status subresources

pub mod constants;
pub mod crd;
pub mod dns;
pub mod dns_errors;
pub mod labels;
pub mod lookup;
pub mod metrics;
pub mod object;
pub mod provider;
pub mod reconcilers;
pub mod state;
