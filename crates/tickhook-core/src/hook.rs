//! One-time activation of the tick hook.
//!
//! [`TickHook`] is the lifecycle object for the whole facility. Startup
//! code constructs it once, then calls [`TickHook::activate`] from as many
//! places as it likes: the first successful call resolves the tick routine
//! and wires both redirects, every later call is a no-op.
//!
//! Two redirect sites are used:
//!
//! - **entry** -- the resolved tick routine address, diverted to
//!   [`TickDispatcher::dispatch_before`].
//! - **secondary** -- the entry (after following a relative jump planted
//!   there, if enabled) plus `tick.secondary_offset` bytes, diverted to
//!   [`TickDispatcher::dispatch_after`]. Another instrumentation layer
//!   already redirects control flow at that point of the host routine, and
//!   this redirect chains behind it. The offset is host-version specific
//!   and comes from configuration.
//!
//! Redirects are never removed once activation has succeeded. A failed
//! activation uninstalls whatever it had installed.

use std::rc::Rc;

use tickhook_types::Address;
use tracing::{error, info, warn};

use crate::config::TickSiteConfig;
use crate::dispatch::TickDispatcher;
use crate::redirect::{RedirectError, RedirectHandle, Redirector};
use crate::signature::AddressResolver;

/// Errors that can occur while activating the tick hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The tick routine signature could not be located in the host.
    #[error("could not find signature {name:?} for the tick event")]
    SignatureNotFound {
        /// The signature name that failed to resolve.
        name: String,
    },

    /// The secondary site would lie outside the address space.
    #[error("secondary hook site overflows: {base} + {offset}")]
    AddressOverflow {
        /// Jump-followed entry address.
        base: Address,
        /// Configured secondary offset.
        offset: u64,
    },

    /// The redirector refused to install or activate a redirect.
    #[error("redirect error: {source}")]
    Redirect {
        /// The underlying redirector error.
        #[from]
        source: RedirectError,
    },
}

/// The two addresses the hook diverts, with their redirect handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSites {
    /// Tick routine entry, diverted to the BEFORE routine.
    pub entry: Address,
    /// Secondary site, diverted to the AFTER routine.
    pub secondary: Address,
    /// Redirect handle for `entry`.
    pub entry_handle: RedirectHandle,
    /// Redirect handle for `secondary`.
    pub secondary_handle: RedirectHandle,
}

/// Outcome of a successful [`TickHook::activate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// This call wired the redirects.
    Installed(HookSites),
    /// An earlier call already did; nothing was changed.
    AlreadyActive,
}

/// Lifecycle object owning the tick dispatcher and its redirect sites.
#[derive(Debug)]
pub struct TickHook {
    dispatcher: Rc<TickDispatcher>,
    site: TickSiteConfig,
    sites: Option<HookSites>,
}

impl TickHook {
    /// Create an inactive hook.
    pub fn new(site: TickSiteConfig, dispatcher: TickDispatcher) -> Self {
        Self {
            dispatcher: Rc::new(dispatcher),
            site,
            sites: None,
        }
    }

    /// Wire the entry and secondary redirects, once.
    ///
    /// Later calls return [`Activation::AlreadyActive`] without touching
    /// the resolver or redirector. The secondary (AFTER) redirect is
    /// installed and activated before the entry (BEFORE) one, so a BEFORE
    /// can never fire without its AFTER. If any install or activation
    /// fails, every redirect this call installed is uninstalled again:
    /// a failed activation leaves nothing behind and may be retried.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::SignatureNotFound`] if the tick routine cannot
    /// be resolved (nothing is installed in that case),
    /// [`HookError::AddressOverflow`] if the secondary site is not
    /// addressable, or [`HookError::Redirect`] if the redirector fails.
    pub fn activate(
        &mut self,
        resolver: &dyn AddressResolver,
        redirector: &mut dyn Redirector,
    ) -> Result<Activation, HookError> {
        if self.sites.is_some() {
            return Ok(Activation::AlreadyActive);
        }

        let sites = self.wire(resolver, redirector).inspect_err(|err| {
            error!(signature = %self.site.signature, error = %err, "Tick hook activation failed");
        })?;
        self.sites = Some(sites);

        info!(
            signature = %self.site.signature,
            entry = %sites.entry,
            secondary = %sites.secondary,
            secondary_offset = self.site.secondary_offset,
            "Tick hook activated"
        );
        Ok(Activation::Installed(sites))
    }

    fn wire(
        &self,
        resolver: &dyn AddressResolver,
        redirector: &mut dyn Redirector,
    ) -> Result<HookSites, HookError> {
        let (entry, secondary) = self.locate(resolver)?;

        let after = Rc::clone(&self.dispatcher);
        let secondary_handle =
            redirector.install(secondary, Box::new(move || after.dispatch_after()))?;

        let before = Rc::clone(&self.dispatcher);
        let entry_handle =
            match redirector.install(entry, Box::new(move || before.dispatch_before())) {
                Ok(handle) => handle,
                Err(err) => {
                    roll_back(redirector, &[secondary_handle]);
                    return Err(err.into());
                }
            };

        let activated = redirector
            .activate(secondary_handle)
            .and_then(|()| redirector.activate(entry_handle));
        if let Err(err) = activated {
            roll_back(redirector, &[entry_handle, secondary_handle]);
            return Err(err.into());
        }

        Ok(HookSites {
            entry,
            secondary,
            entry_handle,
            secondary_handle,
        })
    }

    /// Resolve the entry site and derive the secondary site from it.
    fn locate(&self, resolver: &dyn AddressResolver) -> Result<(Address, Address), HookError> {
        let entry = resolver
            .resolve(&self.site.signature)
            .ok_or_else(|| HookError::SignatureNotFound {
                name: self.site.signature.clone(),
            })?;

        let base = if self.site.follow_jump {
            resolver.follow_jump(entry)
        } else {
            entry
        };

        let secondary = base
            .checked_add(self.site.secondary_offset)
            .ok_or(HookError::AddressOverflow {
                base,
                offset: self.site.secondary_offset,
            })?;

        Ok((entry, secondary))
    }

    /// Whether activation has completed.
    pub const fn is_active(&self) -> bool {
        self.sites.is_some()
    }

    /// The wired sites, once active.
    pub const fn sites(&self) -> Option<&HookSites> {
        self.sites.as_ref()
    }

    /// The site configuration this hook was built with.
    pub const fn site_config(&self) -> &TickSiteConfig {
        &self.site
    }

    /// The dispatcher the redirects call into.
    pub const fn dispatcher(&self) -> &Rc<TickDispatcher> {
        &self.dispatcher
    }
}

/// Undo the redirects of a failed activation.
fn roll_back(redirector: &mut dyn Redirector, handles: &[RedirectHandle]) {
    for &handle in handles {
        if let Err(err) = redirector.uninstall(handle) {
            warn!(address = %handle.address(), error = %err, "Failed to roll back redirect");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::cell::Cell;

    use tickhook_events::EventBus;
    use tickhook_types::TickEvent;

    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::TickCounter;
    use crate::redirect::{RedirectState, RedirectTable};

    const ENTRY: Address = Address::new(0x40_01A0);

    struct Fixed(Option<Address>);

    impl AddressResolver for Fixed {
        fn resolve(&self, _name: &str) -> Option<Address> {
            self.0
        }
    }

    /// Resolver whose entry carries a jump to `target`.
    struct Thunked {
        target: Address,
    }

    impl AddressResolver for Thunked {
        fn resolve(&self, _name: &str) -> Option<Address> {
            Some(ENTRY)
        }

        fn follow_jump(&self, _address: Address) -> Address {
            self.target
        }
    }

    struct Zero;

    impl TickCounter for Zero {
        fn current_tick_count(&self) -> u64 {
            0
        }
    }

    /// Redirector that refuses every install.
    struct Refusing;

    impl Redirector for Refusing {
        fn install(
            &mut self,
            address: Address,
            _routine: crate::redirect::Routine,
        ) -> Result<RedirectHandle, RedirectError> {
            Err(RedirectError::AlreadyInstalled { address })
        }

        fn activate(&mut self, handle: RedirectHandle) -> Result<(), RedirectError> {
            Err(RedirectError::UnknownHandle {
                address: handle.address(),
            })
        }

        fn uninstall(&mut self, handle: RedirectHandle) -> Result<(), RedirectError> {
            Err(RedirectError::UnknownHandle {
                address: handle.address(),
            })
        }
    }

    /// [`RedirectTable`] that can be told to reject its n-th activation,
    /// and records the order sites were activated in.
    #[derive(Default)]
    struct Flaky {
        table: RedirectTable,
        reject_activation: Option<usize>,
        activated: Vec<Address>,
    }

    impl Redirector for Flaky {
        fn install(
            &mut self,
            address: Address,
            routine: crate::redirect::Routine,
        ) -> Result<RedirectHandle, RedirectError> {
            self.table.install(address, routine)
        }

        fn activate(&mut self, handle: RedirectHandle) -> Result<(), RedirectError> {
            if self.reject_activation == Some(self.activated.len()) {
                return Err(RedirectError::UnknownHandle {
                    address: handle.address(),
                });
            }
            self.table.activate(handle)?;
            self.activated.push(handle.address());
            Ok(())
        }

        fn uninstall(&mut self, handle: RedirectHandle) -> Result<(), RedirectError> {
            self.table.uninstall(handle)
        }
    }

    fn hook(site: TickSiteConfig) -> (TickHook, Rc<Cell<u32>>) {
        let bus = Rc::new(EventBus::new());
        let seen = Rc::new(Cell::new(0_u32));
        let counter = Rc::clone(&seen);
        bus.subscribe(move |_: &TickEvent| counter.set(counter.get().saturating_add(1)));
        let dispatcher = TickDispatcher::new(Rc::new(ManualClock::new()), Rc::new(Zero), bus);
        (TickHook::new(site, dispatcher), seen)
    }

    #[test]
    fn activation_wires_entry_and_offset_site() {
        let (mut hook, _) = hook(TickSiteConfig::default());
        let mut table = RedirectTable::new();

        let activation = hook.activate(&Fixed(Some(ENTRY)), &mut table).unwrap();
        let Activation::Installed(sites) = activation else {
            panic!("expected a fresh installation, got {activation:?}");
        };

        assert_eq!(sites.entry, ENTRY);
        assert_eq!(sites.secondary, Address::new(0x40_01B7));
        assert_eq!(table.state(ENTRY), Some(RedirectState::Active));
        assert_eq!(table.state(sites.secondary), Some(RedirectState::Active));
        assert!(hook.is_active());
        assert_eq!(hook.sites(), Some(&sites));
    }

    #[test]
    fn second_activation_is_a_no_op() {
        let (mut hook, _) = hook(TickSiteConfig::default());
        let mut table = RedirectTable::new();

        hook.activate(&Fixed(Some(ENTRY)), &mut table).unwrap();
        let again = hook.activate(&Fixed(Some(ENTRY)), &mut table).unwrap();

        assert_eq!(again, Activation::AlreadyActive);
        assert_eq!(table.installed_count(), 2);
        assert_eq!(table.active_count(), 2);
    }

    #[test]
    fn missing_signature_is_fatal_and_installs_nothing() {
        let (mut hook, _) = hook(TickSiteConfig::default());
        let mut table = RedirectTable::new();

        let err = hook.activate(&Fixed(None), &mut table).unwrap_err();
        assert!(matches!(err, HookError::SignatureNotFound { ref name } if name == "on_tick"));
        assert_eq!(table.installed_count(), 0);
        assert!(!hook.is_active());
    }

    #[test]
    fn secondary_site_follows_entry_jump() {
        let (mut hook, _) = hook(TickSiteConfig::default());
        let mut table = RedirectTable::new();
        let resolver = Thunked {
            target: Address::new(0x50_0000),
        };

        let Activation::Installed(sites) = hook.activate(&resolver, &mut table).unwrap() else {
            panic!("expected a fresh installation");
        };
        assert_eq!(sites.entry, ENTRY);
        assert_eq!(sites.secondary, Address::new(0x50_0017));
    }

    #[test]
    fn jump_following_can_be_disabled() {
        let site = TickSiteConfig {
            follow_jump: false,
            ..TickSiteConfig::default()
        };
        let (mut hook, _) = hook(site);
        let mut table = RedirectTable::new();
        let resolver = Thunked {
            target: Address::new(0x50_0000),
        };

        let Activation::Installed(sites) = hook.activate(&resolver, &mut table).unwrap() else {
            panic!("expected a fresh installation");
        };
        assert_eq!(sites.secondary, Address::new(0x40_01B7));
    }

    #[test]
    fn overflowing_secondary_site_is_rejected() {
        let site = TickSiteConfig {
            secondary_offset: u64::MAX,
            ..TickSiteConfig::default()
        };
        let (mut hook, _) = hook(site);
        let mut table = RedirectTable::new();

        let err = hook.activate(&Fixed(Some(ENTRY)), &mut table).unwrap_err();
        assert!(matches!(err, HookError::AddressOverflow { .. }));
        assert_eq!(table.installed_count(), 0);
    }

    #[test]
    fn redirector_failure_leaves_hook_inactive() {
        let (mut hook, _) = hook(TickSiteConfig::default());
        let err = hook.activate(&Fixed(Some(ENTRY)), &mut Refusing).unwrap_err();
        assert!(matches!(err, HookError::Redirect { .. }));
        assert!(!hook.is_active());
    }

    #[test]
    fn redirects_invoke_the_dispatcher() {
        let (mut hook, seen) = hook(TickSiteConfig::default());
        let mut table = RedirectTable::new();
        let Activation::Installed(sites) = hook.activate(&Fixed(Some(ENTRY)), &mut table).unwrap() else {
            panic!("expected a fresh installation");
        };

        assert!(table.reach(sites.entry));
        assert!(table.reach(sites.secondary));
        assert_eq!(seen.get(), 2);
        assert!(!hook.dispatcher().timer().is_first_tick());
    }

    #[test]
    fn after_redirect_goes_live_before_entry() {
        let (mut hook, _) = hook(TickSiteConfig::default());
        let mut flaky = Flaky::default();

        hook.activate(&Fixed(Some(ENTRY)), &mut flaky).unwrap();
        assert_eq!(flaky.activated, vec![Address::new(0x40_01B7), ENTRY]);
    }

    #[test]
    fn failed_second_activation_rolls_back_and_can_be_retried() {
        let (mut hook, seen) = hook(TickSiteConfig::default());
        let mut flaky = Flaky {
            reject_activation: Some(1),
            ..Flaky::default()
        };
        let secondary = Address::new(0x40_01B7);

        let err = hook.activate(&Fixed(Some(ENTRY)), &mut flaky).unwrap_err();
        assert!(matches!(err, HookError::Redirect { .. }));
        assert!(!hook.is_active());
        assert_eq!(flaky.table.installed_count(), 0);

        // Nothing half-wired remains: ticks pass through undiverted.
        for _ in 0..3 {
            assert!(!flaky.table.reach(ENTRY));
            assert!(!flaky.table.reach(secondary));
        }
        assert_eq!(seen.get(), 0);

        flaky.reject_activation = None;
        let retried = hook.activate(&Fixed(Some(ENTRY)), &mut flaky).unwrap();
        assert!(matches!(retried, Activation::Installed(_)));
        assert_eq!(flaky.table.active_count(), 2);

        assert!(flaky.table.reach(ENTRY));
        assert!(flaky.table.reach(secondary));
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn failed_entry_install_removes_secondary_redirect() {
        // Offset 0 puts both sites on the same address.
        let site = TickSiteConfig {
            secondary_offset: 0,
            follow_jump: false,
            ..TickSiteConfig::default()
        };
        let (mut hook, _) = hook(site);
        let mut table = RedirectTable::new();

        let err = hook.activate(&Fixed(Some(ENTRY)), &mut table).unwrap_err();
        assert!(matches!(
            err,
            HookError::Redirect {
                source: RedirectError::AlreadyInstalled { .. }
            }
        ));
        assert_eq!(table.installed_count(), 0);
    }
}
