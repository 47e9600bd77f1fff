//! Control-flow redirection.
//!
//! A redirect diverts execution that reaches a code address into a
//! replacement routine. The tick hook installs two of them through the
//! [`Redirector`] trait and never removes them.
//!
//! [`RedirectTable`] is the in-process, safe implementation: the host (or a
//! host simulator) calls [`RedirectTable::reach`] whenever execution
//! arrives at an address, and the table runs the routine installed there if
//! its redirect is active. Site lifecycle: installed -> active. A site is
//! only uninstalled to undo an activation that failed partway.

use std::collections::BTreeMap;

use tickhook_types::Address;
use tracing::{debug, trace};

/// A replacement routine run when execution reaches a redirected address.
pub type Routine = Box<dyn FnMut()>;

/// Errors reported by a [`Redirector`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedirectError {
    /// A redirect already exists at this address.
    #[error("a redirect is already installed at {address}")]
    AlreadyInstalled {
        /// The contested address.
        address: Address,
    },

    /// The handle does not name an installed redirect.
    #[error("no redirect is installed at {address}")]
    UnknownHandle {
        /// The address the handle refers to.
        address: Address,
    },
}

/// Opaque reference to an installed redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RedirectHandle {
    address: Address,
}

impl RedirectHandle {
    /// Create a handle for the redirect at `address`.
    pub const fn new(address: Address) -> Self {
        Self { address }
    }

    /// The redirected address.
    pub const fn address(self) -> Address {
        self.address
    }
}

/// Installs and activates control-flow redirects.
pub trait Redirector {
    /// Prepare a redirect at `address` that will run `routine`. The
    /// redirect does not take effect until [`activate`](Self::activate).
    ///
    /// # Errors
    ///
    /// Returns [`RedirectError::AlreadyInstalled`] if `address` is taken.
    fn install(&mut self, address: Address, routine: Routine) -> Result<RedirectHandle, RedirectError>;

    /// Make an installed redirect live.
    ///
    /// # Errors
    ///
    /// Returns [`RedirectError::UnknownHandle`] if nothing is installed for
    /// `handle`.
    fn activate(&mut self, handle: RedirectHandle) -> Result<(), RedirectError>;

    /// Remove an installed redirect, active or not.
    ///
    /// # Errors
    ///
    /// Returns [`RedirectError::UnknownHandle`] if nothing is installed for
    /// `handle`.
    fn uninstall(&mut self, handle: RedirectHandle) -> Result<(), RedirectError>;
}

/// Lifecycle state of a redirect site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectState {
    /// Installed but not diverting execution.
    Installed,
    /// Diverting execution to its routine.
    Active,
}

struct Site {
    routine: Routine,
    state: RedirectState,
}

/// Table-driven [`Redirector`] for in-process hosts.
#[derive(Default)]
pub struct RedirectTable {
    sites: BTreeMap<Address, Site>,
}

impl RedirectTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            sites: BTreeMap::new(),
        }
    }

    /// Execution has reached `address`. Runs the routine there if its
    /// redirect is active, and returns whether it did.
    pub fn reach(&mut self, address: Address) -> bool {
        match self.sites.get_mut(&address) {
            Some(site) if site.state == RedirectState::Active => {
                trace!(address = %address, "Redirect taken");
                (site.routine)();
                true
            }
            _ => false,
        }
    }

    /// State of the redirect at `address`, if any.
    pub fn state(&self, address: Address) -> Option<RedirectState> {
        self.sites.get(&address).map(|site| site.state)
    }

    /// Number of installed redirects, active or not.
    pub fn installed_count(&self) -> usize {
        self.sites.len()
    }

    /// Number of active redirects.
    pub fn active_count(&self) -> usize {
        self.sites
            .values()
            .filter(|site| site.state == RedirectState::Active)
            .count()
    }

    fn site_mut(&mut self, handle: RedirectHandle) -> Result<&mut Site, RedirectError> {
        self.sites
            .get_mut(&handle.address())
            .ok_or(RedirectError::UnknownHandle {
                address: handle.address(),
            })
    }
}

impl Redirector for RedirectTable {
    fn install(&mut self, address: Address, routine: Routine) -> Result<RedirectHandle, RedirectError> {
        if self.sites.contains_key(&address) {
            return Err(RedirectError::AlreadyInstalled { address });
        }
        self.sites.insert(
            address,
            Site {
                routine,
                state: RedirectState::Installed,
            },
        );
        debug!(address = %address, "Redirect installed");
        Ok(RedirectHandle::new(address))
    }

    fn activate(&mut self, handle: RedirectHandle) -> Result<(), RedirectError> {
        let site = self.site_mut(handle)?;
        site.state = RedirectState::Active;
        debug!(address = %handle.address(), "Redirect activated");
        Ok(())
    }

    fn uninstall(&mut self, handle: RedirectHandle) -> Result<(), RedirectError> {
        self.sites
            .remove(&handle.address())
            .ok_or(RedirectError::UnknownHandle {
                address: handle.address(),
            })?;
        debug!(address = %handle.address(), "Redirect uninstalled");
        Ok(())
    }
}

impl core::fmt::Debug for RedirectTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map()
            .entries(self.sites.iter().map(|(address, site)| (address, site.state)))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    const SITE: Address = Address::new(0x40_01A0);

    fn counting_routine() -> (Routine, Rc<Cell<u32>>) {
        let hits = Rc::new(Cell::new(0_u32));
        let inner = Rc::clone(&hits);
        (Box::new(move || inner.set(inner.get().saturating_add(1))), hits)
    }

    #[test]
    fn installed_redirect_is_inert_until_activated() {
        let mut table = RedirectTable::new();
        let (routine, hits) = counting_routine();
        let handle = table.install(SITE, routine).unwrap();

        assert_eq!(table.state(SITE), Some(RedirectState::Installed));
        assert!(!table.reach(SITE));
        assert_eq!(hits.get(), 0);

        table.activate(handle).unwrap();
        assert!(table.reach(SITE));
        assert!(table.reach(SITE));
        assert_eq!(hits.get(), 2);
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn reaching_unredirected_address_does_nothing() {
        let mut table = RedirectTable::new();
        assert!(!table.reach(SITE));
        assert_eq!(table.state(SITE), None);
    }

    #[test]
    fn second_install_at_same_address_fails() {
        let mut table = RedirectTable::new();
        let (first, _) = counting_routine();
        let (second, _) = counting_routine();
        table.install(SITE, first).unwrap();
        assert_eq!(
            table.install(SITE, second).unwrap_err(),
            RedirectError::AlreadyInstalled { address: SITE }
        );
        assert_eq!(table.installed_count(), 1);
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let mut table = RedirectTable::new();
        let handle = RedirectHandle::new(SITE);
        assert!(matches!(
            table.activate(handle),
            Err(RedirectError::UnknownHandle { .. })
        ));
        assert!(matches!(
            table.uninstall(handle),
            Err(RedirectError::UnknownHandle { .. })
        ));
    }

    #[test]
    fn uninstall_frees_the_site() {
        let mut table = RedirectTable::new();
        let (routine, hits) = counting_routine();
        let handle = table.install(SITE, routine).unwrap();
        table.activate(handle).unwrap();
        table.reach(SITE);
        table.uninstall(handle).unwrap();

        assert!(!table.reach(SITE));
        assert_eq!(hits.get(), 1);
        assert_eq!(table.state(SITE), None);
        assert_eq!(table.installed_count(), 0);

        let (again, _) = counting_routine();
        assert!(table.install(SITE, again).is_ok());
    }
}
