//! The socket-source registry: registration, discovery, and the
//! system-implementation preference in `default_source`.

use std::sync::Arc;

use byte_io_core::error::Error;
use byte_io_core::multiplexer::Multiplexer;
use byte_io_core::registry::{default_source, register_source, sources, unregister_source, PlainSourceFeature, SourceHandle, SourceInfo, SourceKey, SourceSet};

fn instantiate() -> byte_io_core::Result<SourceHandle> {
    unimplemented!("not exercised by this test: only registry bookkeeping is under test")
}

fn instantiate_with(_m: Arc<dyn Multiplexer>) -> byte_io_core::Result<SourceHandle> {
    unimplemented!("not exercised by this test: only registry bookkeeping is under test")
}

fn info(name: &str, features: PlainSourceFeature) -> SourceInfo {
    SourceInfo {
        key: SourceKey::new(name, (1, 0, 0)),
        set: SourceSet::Plain,
        features: features.bits(),
        instantiate,
        instantiate_with,
    }
}

#[test]
fn default_source_prefers_system_then_falls_back_then_empty() {
    let third_party = info("third-party-sockets", PlainSourceFeature::KERNEL_SOCKETS);
    let system = info(
        "system-sockets",
        PlainSourceFeature::KERNEL_SOCKETS | PlainSourceFeature::SYSTEM_IMPLEMENTATION,
    );

    register_source(third_party.clone()).unwrap();
    register_source(system.clone()).unwrap();

    let chosen = default_source(SourceSet::Plain, PlainSourceFeature::KERNEL_SOCKETS.bits()).unwrap();
    assert_eq!(chosen.key, system.key);

    unregister_source(&system.key, SourceSet::Plain);
    let chosen = default_source(SourceSet::Plain, PlainSourceFeature::KERNEL_SOCKETS.bits()).unwrap();
    assert_eq!(chosen.key, third_party.key);

    unregister_source(&third_party.key, SourceSet::Plain);
    let mut remaining = Vec::new();
    sources(&mut remaining, SourceSet::Plain, PlainSourceFeature::KERNEL_SOCKETS.bits());
    assert!(remaining.is_empty());
    assert!(default_source(SourceSet::Plain, PlainSourceFeature::KERNEL_SOCKETS.bits()).is_none());
}

#[test]
fn registering_the_same_key_twice_fails() {
    let a = info("duplicate-key-test", PlainSourceFeature::KERNEL_SOCKETS);
    register_source(a.clone()).unwrap();
    let err = register_source(a.clone()).unwrap_err();
    assert!(matches!(err, Error::FileExists(_)));
    unregister_source(&a.key, SourceSet::Plain);
}
