// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label, annotation and finalizer constants used across all
//! reconcilers.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Value for `app.kubernetes.io/part-of` indicating this resource is part of dnsman
pub const PART_OF_DNSMAN: &str = "dnsman";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer placed on managed `DNSEntry` and `DNSLock` objects before any
/// provider-side record exists, and removed only after the record is
/// confirmed gone.
pub const FINALIZER_DNS_ENTRY: &str = "dnsman.io/dnsentry";

/// Finalizer for `DNSProvider` resources
pub const FINALIZER_DNS_PROVIDER: &str = "dnsman.io/dnsprovider";
