//! Email addresses taken from message headers.

use mail_parser::{Addr, Address};

/// A parsed email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Build from a single `mail-parser` address; `None` when it has no address part.
    pub fn from_addr(addr: &Addr<'_>) -> Option<Self> {
        let address = addr.address().map(str::trim).unwrap_or("");
        if address.is_empty() {
            return None;
        }
        Some(Self {
            display_name: addr.name().map(|n| n.trim().to_string()).unwrap_or_default(),
            address: address.to_string(),
        })
    }

    /// Flatten an address header (plain list or groups) into addresses.
    pub fn from_header(header: Option<&Address<'_>>) -> Vec<Self> {
        match header {
            Some(Address::List(list)) => list.iter().filter_map(Self::from_addr).collect(),
            Some(Address::Group(groups)) => groups
                .iter()
                .flat_map(|g| g.addresses.iter())
                .filter_map(Self::from_addr)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
