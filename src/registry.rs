//! The process-wide socket-source registry: an abstract factory directory
//! letting callers discover and instantiate plain or TLS socket
//! implementations by feature bits, keyed by `(name, version, postfix)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use bitflags::bitflags;

use crate::diag::{trace_io, warn_io};
use crate::error::{Error, Result};
use crate::multiplexer::Multiplexer;

bitflags! {
    /// Feature bits a plain socket source may advertise.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PlainSourceFeature: u32 {
        /// Backed by kernel (`AF_INET`/`AF_INET6`) sockets.
        const KERNEL_SOCKETS = 1 << 0;
        /// Can wrap its sockets in TLS via a compatible C5 source.
        const TLS_SOCKETS = 1 << 1;
        /// Can attach this crate's own [`Multiplexer`] implementations.
        const IO_MULTIPLEXER = 1 << 2;
        /// Can attach a multiplexer belonging to a different I/O framework.
        const FOREIGN_IO_MULTIPLEXER = 1 << 3;
        /// This is the platform's default/native implementation, preferred
        /// by [`default_source`] over alternatives.
        const SYSTEM_IMPLEMENTATION = 1 << 4;
    }
}

bitflags! {
    /// Feature bits a TLS socket source may advertise.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TlsSourceFeature: u32 {
        /// Backed by kernel sockets (as opposed to, e.g., an in-memory
        /// transport used for testing).
        const KERNEL_SOCKETS = 1 << 0;
        /// Provides TLS sockets (always set; kept so the bit layout lines
        /// up with [`PlainSourceFeature::TLS_SOCKETS`] for masking).
        const TLS_SOCKETS = 1 << 1;
        /// Can attach this crate's own [`Multiplexer`] implementations.
        const IO_MULTIPLEXER = 1 << 2;
        /// Can wrap (rather than replace) an already-connected plain socket
        /// source's handle.
        const SUPPORTS_WRAP = 1 << 3;
        /// This is the platform's default/native implementation.
        const SYSTEM_IMPLEMENTATION = 1 << 4;
    }
}

/// The version triple carried in a source's registry key, alongside its
/// name and an optional disambiguating postfix (e.g. `"ring"` vs
/// `"aws-lc"` for two TLS sources built on different crypto providers).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    /// The implementation's name, e.g. `"byte-io-core-tls"`.
    pub name: String,
    /// Major/minor/patch version of the implementation.
    pub version: (u32, u32, u32),
    /// An optional disambiguating postfix; empty string if unused.
    pub postfix: String,
}

impl SourceKey {
    /// Builds a key with no postfix.
    pub fn new(name: impl Into<String>, version: (u32, u32, u32)) -> SourceKey {
        SourceKey {
            name: name.into(),
            version,
            postfix: String::new(),
        }
    }

    /// Builds a key with a disambiguating postfix.
    pub fn with_postfix(name: impl Into<String>, version: (u32, u32, u32), postfix: impl Into<String>) -> SourceKey {
        SourceKey {
            name: name.into(),
            version,
            postfix: postfix.into(),
        }
    }

    fn stringified(&self) -> String {
        if self.postfix.is_empty() {
            format!("{}-{}.{}.{}", self.name, self.version.0, self.version.1, self.version.2)
        } else {
            format!("{}-{}.{}.{}-{}", self.name, self.version.0, self.version.1, self.version.2, self.postfix)
        }
    }
}

/// An opaque instantiated socket source. Plain and TLS sources share this
/// wrapper; the caller downcasts based on what it already knows it
/// requested (the registry itself never mixes the two kinds under one
/// `sources()` query — see [`SourceSet`]).
pub struct SourceHandle {
    inner: Arc<dyn std::any::Any + Send + Sync>,
}

impl SourceHandle {
    /// Attempts to view this handle as a `T`, the type the instantiating
    /// source actually produced.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }
}

/// Which half of the registry a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSet {
    /// Plain (non-TLS) socket sources.
    Plain,
    /// TLS socket sources.
    Tls,
}

/// A registered implementation: name/version/postfix key, feature bits,
/// and the function pointers used to instantiate it.
#[derive(Clone)]
pub struct SourceInfo {
    /// The registry key this record was (or will be) registered under.
    pub key: SourceKey,
    /// Which [`SourceSet`] this record belongs to.
    pub set: SourceSet,
    /// Feature bits, interpreted according to `set` (the bit layouts of
    /// [`PlainSourceFeature`] and [`TlsSourceFeature`] are kept numerically
    /// aligned so a caller can mask either with the same `u32`).
    pub features: u32,
    /// Returns a fresh or shared source instance with no multiplexer
    /// attached.
    pub instantiate: fn() -> Result<SourceHandle>,
    /// Returns a fresh or shared source instance bound to `multiplexer`.
    /// Fails [`Error::NotSupported`] if the source cannot share the given
    /// multiplexer implementation.
    pub instantiate_with: fn(Arc<dyn Multiplexer>) -> Result<SourceHandle>,
}

struct Registry {
    plain: HashMap<String, SourceInfo>,
    tls: HashMap<String, SourceInfo>,
}

impl Registry {
    fn table_mut(&mut self, set: SourceSet) -> &mut HashMap<String, SourceInfo> {
        match set {
            SourceSet::Plain => &mut self.plain,
            SourceSet::Tls => &mut self.tls,
        }
    }

    fn table(&self, set: SourceSet) -> &HashMap<String, SourceInfo> {
        match set {
            SourceSet::Plain => &self.plain,
            SourceSet::Tls => &self.tls,
        }
    }
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry {
            plain: HashMap::new(),
            tls: HashMap::new(),
        })
    })
}

/// Registers `info` under its own key. Fails [`Error::FileExists`] if a
/// record is already registered under that key; re-registering is not
/// idempotent by design (the caller must `unregister_source` first if it
/// wants to replace an entry).
pub fn register_source(info: SourceInfo) -> Result<()> {
    let key = info.key.stringified();
    let mut reg = registry().lock().unwrap();
    let table = reg.table_mut(info.set);
    if table.contains_key(&key) {
        warn_io!("source registration {} already present, rejecting", key);
        return Err(Error::FileExists(key));
    }
    trace_io!("registered source {} (set {:?}, features {:#x})", key, info.set, info.features);
    table.insert(key, info);
    Ok(())
}

/// Removes a previously-registered source. Idempotent: unregistering a key
/// that is not present is not an error.
pub fn unregister_source(key: &SourceKey, set: SourceSet) {
    let mut reg = registry().lock().unwrap();
    let removed = reg.table_mut(set).remove(&key.stringified()).is_some();
    trace_io!("unregistered source {} (set {:?}, present: {})", key.stringified(), set, removed);
}

/// Appends every registered source in `set` whose feature bits contain all
/// of `mask` to `out`, returning how many were appended.
pub fn sources(out: &mut Vec<SourceInfo>, set: SourceSet, mask: u32) -> usize {
    let reg = registry().lock().unwrap();
    let mut appended = 0;
    for info in reg.table(set).values() {
        if info.features & mask == mask {
            out.push(info.clone());
            appended += 1;
        }
    }
    appended
}

/// Convenience: the best matching source for `set`/`mask`, preferring one
/// with the `system_implementation` bit set (bit `1 << 4`, shared by both
/// [`PlainSourceFeature::SYSTEM_IMPLEMENTATION`] and
/// [`TlsSourceFeature::SYSTEM_IMPLEMENTATION`]), falling back to any match.
pub fn default_source(set: SourceSet, mask: u32) -> Option<SourceInfo> {
    const SYSTEM_IMPLEMENTATION_BIT: u32 = 1 << 4;
    let mut matches = Vec::new();
    sources(&mut matches, set, mask);
    matches
        .iter()
        .find(|info| info.features & SYSTEM_IMPLEMENTATION_BIT != 0)
        .or_else(|| matches.first())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_instantiate() -> Result<SourceHandle> {
        Ok(SourceHandle {
            inner: Arc::new(()),
        })
    }

    fn noop_instantiate_with(_m: Arc<dyn Multiplexer>) -> Result<SourceHandle> {
        Ok(SourceHandle {
            inner: Arc::new(()),
        })
    }

    fn test_info(name: &str, features: u32) -> SourceInfo {
        SourceInfo {
            key: SourceKey::new(name, (1, 0, 0)),
            set: SourceSet::Plain,
            features,
            instantiate: noop_instantiate,
            instantiate_with: noop_instantiate_with,
        }
    }

    #[test]
    fn register_then_unregister_round_trips() {
        let info = test_info("registry-test-a", PlainSourceFeature::KERNEL_SOCKETS.bits());
        register_source(info.clone()).unwrap();
        let mut out = Vec::new();
        let found = sources(&mut out, SourceSet::Plain, PlainSourceFeature::KERNEL_SOCKETS.bits());
        assert!(found >= 1);
        unregister_source(&info.key, SourceSet::Plain);
        let mut out2 = Vec::new();
        sources(&mut out2, SourceSet::Plain, 0);
        assert!(!out2.iter().any(|i| i.key == info.key));
    }

    #[test]
    fn duplicate_registration_fails() {
        let info = test_info("registry-test-b", 0);
        register_source(info.clone()).unwrap();
        let err = register_source(info.clone()).unwrap_err();
        assert!(matches!(err, Error::FileExists(_)));
        unregister_source(&info.key, SourceSet::Plain);
    }

    #[test]
    fn default_source_prefers_system_implementation() {
        let plain = test_info("registry-test-c-plain", PlainSourceFeature::KERNEL_SOCKETS.bits());
        let system = test_info(
            "registry-test-c-system",
            (PlainSourceFeature::KERNEL_SOCKETS | PlainSourceFeature::SYSTEM_IMPLEMENTATION).bits(),
        );
        register_source(plain.clone()).unwrap();
        register_source(system.clone()).unwrap();
        let chosen = default_source(SourceSet::Plain, PlainSourceFeature::KERNEL_SOCKETS.bits()).unwrap();
        assert_eq!(chosen.key, system.key);
        unregister_source(&plain.key, SourceSet::Plain);
        unregister_source(&system.key, SourceSet::Plain);
    }
}
