// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint descriptors.

use crate::address::ServiceAddress;
use crate::binding::Binding;
use crate::contract::ContractDescription;
use crate::error::{Error, Result};
use std::fmt;

/// One exposed operation set: contract, binding and address.
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    contract: ContractDescription,
    binding: Binding,
    address: ServiceAddress,
}

impl EndpointDescriptor {
    /// Build a descriptor, checking that the binding carries the address scheme.
    pub fn new(
        contract: ContractDescription,
        binding: Binding,
        address: ServiceAddress,
    ) -> Result<Self> {
        if !binding.kind.accepts_scheme(address.scheme()) {
            return Err(Error::argument(
                "address",
                format!(
                    "scheme '{}' of {} is not supported by {} (expected one of {:?})",
                    address.scheme(),
                    address,
                    binding.kind,
                    binding.kind.schemes()
                ),
            ));
        }
        Ok(Self {
            contract,
            binding,
            address,
        })
    }

    pub fn contract(&self) -> &ContractDescription {
        &self.contract
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    /// Same endpoint with `adjust` applied to its binding.
    ///
    /// The scheme check runs again, so an adjustment that changes the
    /// binding kind is rejected here rather than at open.
    pub fn with_binding_adjusted<F>(self, adjust: F) -> Result<Self>
    where
        F: FnOnce(&mut Binding),
    {
        let Self {
            contract,
            mut binding,
            address,
        } = self;
        adjust(&mut binding);
        Self::new(contract, binding, address)
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.address,
            self.binding.kind,
            self.contract.full_name()
        )
    }
}
