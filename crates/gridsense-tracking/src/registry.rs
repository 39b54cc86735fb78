//! Process-wide tracker registry.
//!
//! A single mapping from tracker id to (schema, factory), initialised on
//! first access with the built-in algorithms. Hosts discover trackers via
//! [`list`], fetch schemas without instantiation via [`info`], and spin
//! up instances via [`create`]; extra trackers can be added at startup
//! through [`register`].

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::tracker::{Tracker, TrackerInfo};

/// A tracker's registry entry: static description plus factory.
pub struct Registration {
    /// Static description (id, N, M, parameter schema, defaults).
    pub info: TrackerInfo,
    /// Creates a fresh instance with default parameters.
    pub factory: fn() -> Box<dyn Tracker>,
}

static REGISTRY: Lazy<Mutex<Vec<Registration>>> = Lazy::new(|| {
    Mutex::new(vec![
        crate::brute_force::BruteForceTracker::registration(),
        crate::derivative::DerivativeTracker::registration(),
        crate::derivative2::Derivative2Tracker::registration(),
        crate::quadrant::QuadrantTracker::registration(),
    ])
});

/// Register a tracker. Registration is idempotent: a duplicate id is
/// ignored, keeping the entry that was there first.
pub fn register(reg: Registration) {
    let mut entries = REGISTRY.lock();
    if entries.iter().any(|e| e.info.id == reg.info.id) {
        debug!(id = reg.info.id, "duplicate tracker registration ignored");
        return;
    }
    entries.push(reg);
}

/// All registered trackers, sorted by id.
pub fn list() -> Vec<TrackerInfo> {
    let entries = REGISTRY.lock();
    let mut infos: Vec<TrackerInfo> = entries.iter().map(|e| e.info.clone()).collect();
    infos.sort_by(|a, b| a.id.cmp(b.id));
    infos
}

/// The description of one tracker, without instantiating it.
pub fn info(id: &str) -> Option<TrackerInfo> {
    REGISTRY
        .lock()
        .iter()
        .find(|e| e.info.id == id)
        .map(|e| e.info.clone())
}

/// Instantiate a tracker by id.
pub fn create(id: &str) -> Option<Box<dyn Tracker>> {
    let factory = REGISTRY
        .lock()
        .iter()
        .find(|e| e.info.id == id)
        .map(|e| e.factory)?;
    Some(factory())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::ParamSpec;

    #[test]
    fn built_ins_are_present_and_sorted() {
        let infos = list();
        for id in [
            "BruteForce_16x2",
            "Derivative2_16x5",
            "Derivative_16x5",
            "ExampleAlgo_16x1",
        ] {
            assert!(infos.iter().any(|i| i.id == id), "missing {id}");
        }
        for pair in infos.windows(2) {
            assert!(pair[0].id < pair[1].id, "listing not sorted by id");
        }
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let before = list().iter().filter(|i| i.id == "BruteForce_16x2").count();
        assert_eq!(before, 1);

        register(Registration {
            info: TrackerInfo {
                id: "BruteForce_16x2",
                channels: 4, // deliberately wrong; must not replace
                window: 9,
                params: Vec::new(),
                defaults: Vec::new(),
            },
            factory: || Box::new(crate::quadrant::QuadrantTracker::new()),
        });

        let infos = list();
        let entries: Vec<_> = infos.iter().filter(|i| i.id == "BruteForce_16x2").collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].channels, 16);
    }

    #[test]
    fn created_instances_match_their_info() {
        // Restricted to the built-ins: other tests register their own
        // entries in the shared process-wide registry.
        let built_ins = [
            "BruteForce_16x2",
            "Derivative2_16x5",
            "Derivative_16x5",
            "ExampleAlgo_16x1",
        ];
        for info in list().into_iter().filter(|i| built_ins.contains(&i.id)) {
            let tracker = create(info.id).expect("factory failed");
            assert_eq!(tracker.id(), info.id);
            assert_eq!(tracker.channels(), info.channels);
            assert_eq!(tracker.window(), info.window);
            assert_eq!(tracker.defaults(), info.defaults);
        }
    }

    #[test]
    fn info_without_instantiation() {
        let info = info("Derivative_16x5").unwrap();
        assert_eq!(info.channels, 16);
        assert_eq!(info.window, 5);
        assert!(!info.params.is_empty());
    }

    #[test]
    fn unknown_id_yields_none() {
        assert!(info("NoSuchTracker").is_none());
        assert!(create("NoSuchTracker").is_none());
    }

    #[test]
    fn schemas_keep_defaults_in_range() {
        for info in list() {
            assert_eq!(info.params.len(), info.defaults.len());
            for ParamSpec {
                key,
                min,
                max,
                default,
                ..
            } in &info.params
            {
                assert!(
                    min <= default && default <= max,
                    "{}: default {default} outside [{min}, {max}]",
                    key
                );
            }
        }
    }

    #[test]
    fn host_supplied_trackers_can_register() {
        register(Registration {
            info: TrackerInfo {
                id: "CustomTestTracker",
                channels: 16,
                window: 1,
                params: Vec::new(),
                defaults: Vec::new(),
            },
            factory: || Box::new(crate::quadrant::QuadrantTracker::new()),
        });
        assert!(info("CustomTestTracker").is_some());
        assert!(create("CustomTestTracker").is_some());
    }
}
