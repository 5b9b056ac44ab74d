//! # Configuration Resolution
//!
//! The resolver binds a stream identity (MSVID) to the `ResolvedConfiguration` used to
//! read its sample blocks. Resolution walks an ordered list of sources and stops at the
//! first that yields a configuration:
//!
//! 1. the cache of previously resolved identities,
//! 2. a configuration supplied alongside the frame (when its identity matches),
//! 3. an external `ConfigurationLookup`,
//! 4. an associated ETR file (when enabled),
//! 5. a guess from the sample length (when enabled).
//!
//! First resolutions are serialized: the thread that derives a configuration publishes
//! it to the sink and only then inserts it into the cache, so every cache reader sees a
//! configuration that has already been published. A thread that loses the race waits,
//! finds the winner's entry and reuses it. Failed derivations never insert, and a
//! missing or invalid definition file is remembered so the file system is probed once
//! per identity. The sink must not call back into the resolver.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use super::common::ParseError;
use super::config::{guess, ConfigurationSource, DerivationDefaults, ResolvedConfiguration};
use super::etr::{load_etr, ETR_EXTENSION};

/// Sub-directory searched after the configuration directory itself.
pub const CONFIGURATION_CACHE_DIRECTORY: &str = "ConfigurationCache";

/// External source of configurations, consulted before any derivation.
pub trait ConfigurationLookup: Send + Sync {
    fn lookup(&self, identity: &str) -> Option<ResolvedConfiguration>;
}

/// Finds the ETR definition file associated with an identity.
pub trait AssociatedFileLocator: Send + Sync {
    fn locate(&self, identity: &str) -> Option<PathBuf>;
}

/// Receives configurations the first time they are resolved.
pub trait ConfigurationSink {
    fn configuration_resolved(&self, configuration: Arc<ResolvedConfiguration>);
}

/// Looks for `<dir>/<identity>.etr`, then `<dir>/ConfigurationCache/<identity>.etr`.
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    directory: PathBuf,
}

impl DirectoryLocator {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        DirectoryLocator {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// An identity may only name a single plain file inside the directory.
    fn is_safe_identity(identity: &str) -> bool {
        if identity.is_empty()
            || identity.contains("..")
            || identity.contains('/')
            || identity.contains('\\')
        {
            return false;
        }
        let mut components = Path::new(identity).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
    }
}

impl AssociatedFileLocator for DirectoryLocator {
    fn locate(&self, identity: &str) -> Option<PathBuf> {
        if !Self::is_safe_identity(identity) {
            debug!("Identity '{}' cannot name a definition file", identity);
            return None;
        }
        let file_name = format!("{}.{}", identity, ETR_EXTENSION);
        [
            self.directory.join(&file_name),
            self.directory
                .join(CONFIGURATION_CACHE_DIRECTORY)
                .join(&file_name),
        ]
        .into_iter()
        .find(|candidate| candidate.is_file())
    }
}

/// Which derivations the resolver may attempt after the cache and supplied sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverPolicy {
    pub use_etr_configuration: bool,
    pub guess_configuration: bool,
    pub defaults: DerivationDefaults,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        ResolverPolicy {
            use_etr_configuration: true,
            guess_configuration: true,
            defaults: DerivationDefaults::default(),
        }
    }
}

/// Per-ASDU inputs to one resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveRequest<'a> {
    pub identity: &'a str,
    pub sample_length: usize,
    /// Sample rate carried in the ASDU, used for derived configurations.
    pub sample_rate: Option<u16>,
    pub supplied: Option<&'a ResolvedConfiguration>,
}

#[derive(Debug, Default)]
struct ResolverState {
    configurations: HashMap<String, Arc<ResolvedConfiguration>>,
    /// Identities whose definition file is missing or invalid.
    missing_definitions: HashSet<String>,
}

/// Thread-safe configuration cache plus the derivation chain.
pub struct ConfigurationResolver {
    state: RwLock<ResolverState>,
    /// Held while a configuration is derived, published and inserted.
    resolving: Mutex<()>,
    policy: ResolverPolicy,
    lookup: Option<Arc<dyn ConfigurationLookup>>,
    locator: Option<Arc<dyn AssociatedFileLocator>>,
}

impl ConfigurationResolver {
    pub fn new(policy: ResolverPolicy) -> Self {
        ConfigurationResolver {
            state: RwLock::new(ResolverState::default()),
            resolving: Mutex::new(()),
            policy,
            lookup: None,
            locator: None,
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn ConfigurationLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn AssociatedFileLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn policy(&self) -> &ResolverPolicy {
        &self.policy
    }

    pub fn cached(&self, identity: &str) -> Option<Arc<ResolvedConfiguration>> {
        self.state.read().configurations.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().configurations.is_empty()
    }

    /// Drops a cached identity so the next frame re-resolves it, probing its definition
    /// file again.
    pub fn invalidate(&self, identity: &str) -> Option<Arc<ResolvedConfiguration>> {
        let mut state = self.state.write();
        state.missing_definitions.remove(identity);
        state.configurations.remove(identity)
    }

    /// Publishes a newly resolved configuration, then makes it visible in the cache.
    ///
    /// Callers hold `resolving`.
    fn publish_and_insert(
        &self,
        configuration: ResolvedConfiguration,
        sink: &dyn ConfigurationSink,
    ) -> Arc<ResolvedConfiguration> {
        let configuration = Arc::new(configuration);
        info!(
            "Resolved {} configuration for '{}' ({} phasors, {} analogs, {} digitals)",
            configuration.source,
            configuration.identity,
            configuration.phasors.len(),
            configuration.analogs.len(),
            configuration.digitals.len()
        );
        sink.configuration_resolved(Arc::clone(&configuration));
        self.state
            .write()
            .configurations
            .insert(configuration.identity.clone(), Arc::clone(&configuration));
        configuration
    }

    /// Registers a supplied configuration, replacing any cached entry for its identity.
    ///
    /// The configuration is published when it is new or differs from the cached one,
    /// before it replaces that entry.
    pub fn register(
        &self,
        configuration: ResolvedConfiguration,
        sink: &dyn ConfigurationSink,
    ) -> Arc<ResolvedConfiguration> {
        let _resolving = self.resolving.lock();
        let configuration = Arc::new(configuration);
        let changed = self
            .cached(&configuration.identity)
            .map_or(true, |previous| *previous != *configuration);
        if changed {
            info!(
                "Registered {} configuration for '{}'",
                configuration.source, configuration.identity
            );
            sink.configuration_resolved(Arc::clone(&configuration));
        }
        let mut state = self.state.write();
        state.missing_definitions.remove(&configuration.identity);
        state
            .configurations
            .insert(configuration.identity.clone(), Arc::clone(&configuration));
        configuration
    }

    /// Resolves the configuration for one ASDU.
    ///
    /// # Returns
    ///
    /// * `Some(Arc<ResolvedConfiguration>)`: The bound configuration, already published.
    /// * `None`: No source produced a configuration; the caller skips the sample.
    pub fn resolve(
        &self,
        request: &ResolveRequest<'_>,
        sink: &dyn ConfigurationSink,
    ) -> Option<Arc<ResolvedConfiguration>> {
        if let Some(cached) = self.cached(request.identity) {
            return Some(cached);
        }

        let _resolving = self.resolving.lock();
        // Another thread may have resolved the identity while this one waited.
        if let Some(cached) = self.cached(request.identity) {
            return Some(cached);
        }

        if let Some(supplied) = request.supplied {
            if supplied.identity == request.identity {
                return Some(self.publish_and_insert(supplied.clone(), sink));
            }
        }

        if let Some(lookup) = &self.lookup {
            if let Some(mut found) = lookup.lookup(request.identity) {
                found.identity = request.identity.to_string();
                found.source = ConfigurationSource::Supplied;
                return Some(self.publish_and_insert(found, sink));
            }
        }

        let mut defaults = self.policy.defaults;
        if let Some(rate) = request.sample_rate.filter(|rate| *rate > 0) {
            defaults.sample_rate = rate;
        }

        if self.policy.use_etr_configuration {
            if let Some(configuration) = self.derive_from_file(request.identity, &defaults) {
                return Some(self.publish_and_insert(configuration, sink));
            }
        }

        if self.policy.guess_configuration {
            match guess(request.identity, request.sample_length, &defaults) {
                Ok(configuration) => return Some(self.publish_and_insert(configuration, sink)),
                Err(e) => debug!("No guess for '{}': {}", request.identity, e),
            }
        }

        debug!(
            "No configuration resolved for '{}' ({} sample bytes)",
            request.identity, request.sample_length
        );
        None
    }

    fn derive_from_file(
        &self,
        identity: &str,
        defaults: &DerivationDefaults,
    ) -> Option<ResolvedConfiguration> {
        let locator = self.locator.as_ref()?;
        if self.state.read().missing_definitions.contains(identity) {
            return None;
        }
        let derived = match locator.locate(identity) {
            Some(path) => match load_etr(identity, &path, defaults) {
                Ok(configuration) => Some(configuration),
                Err(e) => {
                    warn!("Ignoring {}: {}", path.display(), describe(&e));
                    None
                }
            },
            None => {
                debug!("No definition file for '{}'", identity);
                None
            }
        };
        if derived.is_none() {
            self.state
                .write()
                .missing_definitions
                .insert(identity.to_string());
        }
        derived
    }
}

impl std::fmt::Debug for ConfigurationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationResolver")
            .field("cached", &self.len())
            .field("policy", &self.policy)
            .field("lookup", &self.lookup.is_some())
            .field("locator", &self.locator.is_some())
            .finish()
    }
}

fn describe(error: &ParseError) -> String {
    match error {
        ParseError::InvalidDerivedConfiguration { message } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        resolved: Mutex<Vec<String>>,
    }

    impl ConfigurationSink for RecordingSink {
        fn configuration_resolved(&self, configuration: Arc<ResolvedConfiguration>) {
            self.resolved.lock().push(configuration.identity.clone());
        }
    }

    struct CountingLocator {
        calls: AtomicUsize,
        path: Option<PathBuf>,
    }

    impl CountingLocator {
        fn new(path: Option<PathBuf>) -> Arc<Self> {
            Arc::new(CountingLocator {
                calls: AtomicUsize::new(0),
                path,
            })
        }
    }

    impl AssociatedFileLocator for CountingLocator {
        fn locate(&self, _identity: &str) -> Option<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.path.clone()
        }
    }

    struct FixedLookup;

    impl ConfigurationLookup for FixedLookup {
        fn lookup(&self, identity: &str) -> Option<ResolvedConfiguration> {
            if identity == "7_Known" {
                guess(identity, 26, &DerivationDefaults::default()).ok()
            } else {
                None
            }
        }
    }

    fn request(identity: &str, sample_length: usize) -> ResolveRequest<'_> {
        ResolveRequest {
            identity,
            sample_length,
            sample_rate: None,
            supplied: None,
        }
    }

    #[test]
    fn test_second_resolution_hits_cache() {
        let locator = CountingLocator::new(None);
        let resolver = ConfigurationResolver::new(ResolverPolicy::default())
            .with_locator(locator.clone());
        let sink = RecordingSink::default();

        let first = resolver.resolve(&request("1_A", 18), &sink).unwrap();
        let second = resolver.resolve(&request("1_A", 18), &sink).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(locator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.resolved.lock().len(), 1);
        assert_eq!(first.source, ConfigurationSource::Guessed);
    }

    #[test]
    fn test_unresolved_does_not_insert() {
        let policy = ResolverPolicy {
            guess_configuration: false,
            ..ResolverPolicy::default()
        };
        let resolver = ConfigurationResolver::new(policy);
        let sink = RecordingSink::default();
        assert!(resolver.resolve(&request("1_A", 18), &sink).is_none());
        assert!(resolver.is_empty());

        let guessing = ConfigurationResolver::new(ResolverPolicy::default());
        assert!(guessing.resolve(&request("1_A", 11), &sink).is_none());
        assert!(guessing.is_empty());
        assert!(sink.resolved.lock().is_empty());
    }

    #[test]
    fn test_supplied_configuration_wins_over_guess() {
        let resolver = ConfigurationResolver::new(ResolverPolicy::default());
        let sink = RecordingSink::default();
        let mut supplied = guess("1_A", 26, &DerivationDefaults::default()).unwrap();
        supplied.source = ConfigurationSource::Supplied;

        let resolved = resolver
            .resolve(
                &ResolveRequest {
                    supplied: Some(&supplied),
                    ..request("1_A", 18)
                },
                &sink,
            )
            .unwrap();
        assert_eq!(resolved.source, ConfigurationSource::Supplied);
        assert_eq!(resolved.phasors.len(), 2);

        // A supplied configuration for another identity is ignored.
        let other = resolver
            .resolve(
                &ResolveRequest {
                    supplied: Some(&supplied),
                    ..request("2_B", 18)
                },
                &sink,
            )
            .unwrap();
        assert_eq!(other.source, ConfigurationSource::Guessed);
    }

    #[test]
    fn test_external_lookup() {
        let resolver =
            ConfigurationResolver::new(ResolverPolicy::default()).with_lookup(Arc::new(FixedLookup));
        let sink = RecordingSink::default();
        let resolved = resolver.resolve(&request("7_Known", 18), &sink).unwrap();
        assert_eq!(resolved.source, ConfigurationSource::Supplied);
        assert_eq!(resolved.phasors.len(), 2);
    }

    #[test]
    fn test_asdu_sample_rate_overrides_default() {
        let resolver = ConfigurationResolver::new(ResolverPolicy::default());
        let sink = RecordingSink::default();
        let resolved = resolver
            .resolve(
                &ResolveRequest {
                    sample_rate: Some(60),
                    ..request("1_A", 18)
                },
                &sink,
            )
            .unwrap();
        assert_eq!(resolved.sample_rate, 60);
    }

    #[test]
    fn test_register_replaces_and_publishes_changes() {
        let resolver = ConfigurationResolver::new(ResolverPolicy::default());
        let sink = RecordingSink::default();
        let configuration = guess("1_A", 18, &DerivationDefaults::default()).unwrap();

        resolver.register(configuration.clone(), &sink);
        resolver.register(configuration.clone(), &sink);
        assert_eq!(sink.resolved.lock().len(), 1);

        let changed = guess("1_A", 26, &DerivationDefaults::default()).unwrap();
        resolver.register(changed, &sink);
        assert_eq!(sink.resolved.lock().len(), 2);
        assert_eq!(resolver.cached("1_A").unwrap().phasors.len(), 2);
    }

    #[test]
    fn test_unsafe_identities_never_locate() {
        let locator = DirectoryLocator::new("/tmp");
        for identity in ["../etc/passwd", "a/b", "a\\b", "..", ""] {
            assert!(locator.locate(identity).is_none(), "{}", identity);
        }
    }

    #[test]
    fn test_missing_definition_is_located_once() {
        let locator = CountingLocator::new(None);
        let policy = ResolverPolicy {
            guess_configuration: false,
            ..ResolverPolicy::default()
        };
        let resolver = ConfigurationResolver::new(policy).with_locator(locator.clone());
        let sink = RecordingSink::default();

        for _ in 0..5 {
            assert!(resolver.resolve(&request("1_A", 18), &sink).is_none());
        }
        assert_eq!(locator.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.is_empty());

        // Invalidation forgets the missing file.
        resolver.invalidate("1_A");
        assert!(resolver.resolve(&request("1_A", 18), &sink).is_none());
        assert_eq!(locator.calls.load(Ordering::SeqCst), 2);
        assert!(sink.resolved.lock().is_empty());
    }

    #[test]
    fn test_invalid_definition_is_read_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1_A.etr");
        std::fs::write(&path, "VPHM,FLOAT32,no flag first\n").unwrap();
        let locator = CountingLocator::new(Some(path));
        let policy = ResolverPolicy {
            guess_configuration: false,
            ..ResolverPolicy::default()
        };
        let resolver = ConfigurationResolver::new(policy).with_locator(locator.clone());
        let sink = RecordingSink::default();

        for _ in 0..3 {
            assert!(resolver.resolve(&request("1_A", 18), &sink).is_none());
        }
        assert_eq!(locator.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.is_empty());
    }

    #[test]
    fn test_register_forgets_missing_definition() {
        let locator = CountingLocator::new(None);
        let policy = ResolverPolicy {
            guess_configuration: false,
            ..ResolverPolicy::default()
        };
        let resolver = ConfigurationResolver::new(policy).with_locator(locator.clone());
        let sink = RecordingSink::default();

        assert!(resolver.resolve(&request("1_A", 18), &sink).is_none());
        let configuration = guess("1_A", 18, &DerivationDefaults::default()).unwrap();
        resolver.register(configuration, &sink);
        assert!(!resolver.state.read().missing_definitions.contains("1_A"));
        assert!(resolver.resolve(&request("1_A", 18), &sink).is_some());
        assert_eq!(locator.calls.load(Ordering::SeqCst), 1);
    }

    /// Records configurations and frames in one log, slowly publishing configurations.
    #[derive(Default)]
    struct SlowSink {
        log: Mutex<Vec<String>>,
    }

    impl ConfigurationSink for SlowSink {
        fn configuration_resolved(&self, configuration: Arc<ResolvedConfiguration>) {
            std::thread::sleep(std::time::Duration::from_millis(300));
            self.log
                .lock()
                .push(format!("config {}", configuration.identity));
        }
    }

    #[test]
    fn test_concurrent_resolution_sees_only_published_configurations() {
        let resolver = ConfigurationResolver::new(ResolverPolicy::default());
        let sink = SlowSink::default();

        std::thread::scope(|scope| {
            let first = scope.spawn(|| {
                resolver.resolve(&request("1_Race", 18), &sink).unwrap();
                sink.log.lock().push("frame".to_string());
            });
            let second = scope.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(100));
                resolver.resolve(&request("1_Race", 18), &sink).unwrap();
                sink.log.lock().push("frame".to_string());
            });
            first.join().unwrap();
            second.join().unwrap();
        });

        let log = sink.log.lock();
        assert_eq!(*log, vec!["config 1_Race", "frame", "frame"]);
        assert_eq!(resolver.len(), 1);
    }
}
