//! Target auto-detection for platforms with a target manager
//!
//! Resolves "no explicit target" into a default target by cycling through
//! three states under one deadline:
//!
//! - check-default: a default is configured -> done
//! - list-registered: exactly one known target becomes the default
//! - detect-network: exactly one reachable target gets registered
//!
//! More than one candidate in either listing state is an ambiguity error;
//! there is no tie-break.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info};

use super::{actions, DeviceProvider};
use crate::config::deadline_after;
use crate::error::{DeviceError, Result};

/// Pause before revisiting a state the machine has already passed through twice
const REVISIT_PAUSE: Duration = Duration::from_millis(500);

/// An addressable device known to a platform's target manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    #[serde(default)]
    pub address: String,
}

impl Target {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Operations the auto-detection machine needs from a platform
#[async_trait]
pub trait TargetManager: Send + Sync {
    async fn default_target(&self) -> Result<Option<Target>>;
    async fn registered_targets(&self) -> Result<Vec<Target>>;
    async fn detect_targets(&self) -> Result<Vec<Target>>;
    async fn set_default(&self, target: &Target) -> Result<()>;
    async fn register(&self, target: &Target) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    CheckDefault,
    ListRegistered,
    DetectNetwork,
}

impl State {
    fn index(self) -> usize {
        self as usize
    }
}

/// Run the detection machine until a default target exists or `timeout` passes
pub async fn auto_detect<M>(manager: &M, timeout: Duration) -> Result<Target>
where
    M: TargetManager + ?Sized,
{
    let deadline = deadline_after(Instant::now(), timeout);
    let mut state = State::CheckDefault;
    let mut visits = [0u32; 3];

    loop {
        visits[state.index()] += 1;
        if visits[state.index()] > 2 {
            if Instant::now() + REVISIT_PAUSE >= deadline {
                return Err(DeviceError::DetectionTimeout { timeout });
            }
            sleep(REVISIT_PAUSE).await;
        }
        debug!("Target detection: {:?}", state);

        let step = timeout_at(deadline, step(manager, state)).await;
        match step {
            Err(_) => return Err(DeviceError::DetectionTimeout { timeout }),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(Next::Done(target))) => {
                info!("Using default target {} ({})", target.name, target.address);
                return Ok(target);
            }
            Ok(Ok(Next::Go(next))) => state = next,
        }
    }
}

enum Next {
    Done(Target),
    Go(State),
}

async fn step<M>(manager: &M, state: State) -> Result<Next>
where
    M: TargetManager + ?Sized,
{
    match state {
        State::CheckDefault => Ok(match manager.default_target().await? {
            Some(target) => Next::Done(target),
            None => Next::Go(State::ListRegistered),
        }),
        State::ListRegistered => {
            let registered = manager.registered_targets().await?;
            match registered.as_slice() {
                [] => Ok(Next::Go(State::DetectNetwork)),
                [only] => {
                    info!("Setting {} as the default target", only.name);
                    manager.set_default(only).await?;
                    Ok(Next::Go(State::CheckDefault))
                }
                many => Err(DeviceError::AmbiguousTargets {
                    source_kind: "registered".to_string(),
                    count: many.len(),
                }),
            }
        }
        State::DetectNetwork => {
            let detected = manager.detect_targets().await?;
            match detected.as_slice() {
                [] => Err(DeviceError::NoTargetsFound),
                [only] => {
                    info!("Registering detected target {} ({})", only.name, only.address);
                    manager.register(only).await?;
                    Ok(Next::Go(State::ListRegistered))
                }
                many => Err(DeviceError::AmbiguousTargets {
                    source_kind: "detected".to_string(),
                    count: many.len(),
                }),
            }
        }
    }
}

/// Target manager backed by a provider's `*-target` command table entries
pub struct CommandTargetManager<'a, P: DeviceProvider + ?Sized> {
    provider: &'a P,
}

impl<'a, P: DeviceProvider + ?Sized> CommandTargetManager<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: DeviceProvider + ?Sized> TargetManager for CommandTargetManager<'_, P> {
    async fn default_target(&self) -> Result<Option<Target>> {
        let value = self.provider.invoke(actions::GET_DEFAULT_TARGET, &[]).await?;
        Ok(targets_from_value(value).into_iter().next())
    }

    async fn registered_targets(&self) -> Result<Vec<Target>> {
        let value = self.provider.invoke(actions::LIST_TARGET, &[]).await?;
        Ok(targets_from_value(value))
    }

    async fn detect_targets(&self) -> Result<Vec<Target>> {
        let value = self.provider.invoke(actions::DETECT_TARGET, &[]).await?;
        Ok(targets_from_value(value))
    }

    async fn set_default(&self, target: &Target) -> Result<()> {
        self.provider
            .invoke(actions::SET_DEFAULT_TARGET, &[target.name.as_str()])
            .await
            .map(|_| ())
    }

    async fn register(&self, target: &Target) -> Result<()> {
        self.provider
            .invoke(
                actions::REGISTER_TARGET,
                &[target.name.as_str(), target.address.as_str()],
            )
            .await
            .map(|_| ())
    }
}

/// Interpret command output as targets.
///
/// Objects deserialize as [`Target`]; plain strings (including untransformed
/// raw output, one target per line) become targets named and addressed by the
/// string itself.
pub fn targets_from_value(value: Option<Value>) -> Vec<Target> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(raw)) => raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Target::new(line, line))
            .collect(),
        Some(Value::Array(items)) => items
            .into_iter()
            .flat_map(|item| targets_from_value(Some(item)))
            .collect(),
        Some(object @ Value::Object(_)) => serde_json::from_value::<Target>(object)
            .map(|t| {
                if t.address.is_empty() {
                    Target::new(t.name.clone(), t.name)
                } else {
                    t
                }
            })
            .into_iter()
            .collect(),
        Some(other) => {
            let text = other.to_string();
            vec![Target::new(text.clone(), text)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory target manager
    #[derive(Default)]
    struct FakeManager {
        default: Mutex<Option<Target>>,
        registered: Mutex<Vec<Target>>,
        reachable: Vec<Target>,
        actions: Mutex<Vec<String>>,
        ignore_set_default: bool,
    }

    impl FakeManager {
        fn with_registered(targets: Vec<Target>) -> Self {
            Self {
                registered: Mutex::new(targets),
                ..Default::default()
            }
        }

        fn with_reachable(targets: Vec<Target>) -> Self {
            Self {
                reachable: targets,
                ..Default::default()
            }
        }

        fn log(&self) -> Vec<String> {
            self.actions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TargetManager for FakeManager {
        async fn default_target(&self) -> Result<Option<Target>> {
            self.actions.lock().unwrap().push("default".into());
            Ok(self.default.lock().unwrap().clone())
        }

        async fn registered_targets(&self) -> Result<Vec<Target>> {
            self.actions.lock().unwrap().push("list".into());
            Ok(self.registered.lock().unwrap().clone())
        }

        async fn detect_targets(&self) -> Result<Vec<Target>> {
            self.actions.lock().unwrap().push("detect".into());
            Ok(self.reachable.clone())
        }

        async fn set_default(&self, target: &Target) -> Result<()> {
            self.actions
                .lock()
                .unwrap()
                .push(format!("set-default {}", target.name));
            if !self.ignore_set_default {
                *self.default.lock().unwrap() = Some(target.clone());
            }
            Ok(())
        }

        async fn register(&self, target: &Target) -> Result<()> {
            self.actions
                .lock()
                .unwrap()
                .push(format!("register {}", target.name));
            self.registered.lock().unwrap().push(target.clone());
            Ok(())
        }
    }

    fn kit(name: &str) -> Target {
        Target::new(name, format!("10.0.0.{}", name.len()))
    }

    #[tokio::test]
    async fn test_existing_default_wins_immediately() {
        let manager = FakeManager::default();
        *manager.default.lock().unwrap() = Some(kit("a"));

        let target = auto_detect(&manager, Duration::from_secs(5)).await.unwrap();
        assert_eq!(target.name, "a");
        assert_eq!(manager.log(), vec!["default"]);
    }

    #[tokio::test]
    async fn test_single_registered_target_becomes_default() {
        let manager = FakeManager::with_registered(vec![kit("only")]);

        let target = auto_detect(&manager, Duration::from_secs(5)).await.unwrap();
        assert_eq!(target.name, "only");
        assert_eq!(manager.default.lock().unwrap().as_ref(), Some(&kit("only")));
        assert_eq!(
            manager.log(),
            vec!["default", "list", "set-default only", "default"]
        );
    }

    #[tokio::test]
    async fn test_two_registered_targets_are_ambiguous() {
        let manager = FakeManager::with_registered(vec![kit("a"), kit("bb")]);

        match auto_detect(&manager, Duration::from_secs(5)).await.unwrap_err() {
            DeviceError::AmbiguousTargets { count, .. } => assert_eq!(count, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(manager.default.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nothing_registered_or_reachable() {
        let manager = FakeManager::default();
        let err = auto_detect(&manager, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, DeviceError::NoTargetsFound));
        assert_eq!(manager.log(), vec!["default", "list", "detect"]);
    }

    #[tokio::test]
    async fn test_single_reachable_target_is_registered_then_defaulted() {
        let manager = FakeManager::with_reachable(vec![kit("net")]);

        let target = auto_detect(&manager, Duration::from_secs(5)).await.unwrap();
        assert_eq!(target.name, "net");
        assert_eq!(
            manager.log(),
            vec![
                "default",
                "list",
                "detect",
                "register net",
                "list",
                "set-default net",
                "default"
            ]
        );
    }

    #[tokio::test]
    async fn test_multiple_reachable_targets_are_ambiguous() {
        let manager = FakeManager::with_reachable(vec![kit("a"), kit("bb"), kit("ccc")]);
        match auto_detect(&manager, Duration::from_secs(5)).await.unwrap_err() {
            DeviceError::AmbiguousTargets { count, .. } => assert_eq!(count, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert!(manager.registered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycling_without_progress_hits_deadline() {
        let manager = FakeManager {
            registered: Mutex::new(vec![kit("stuck")]),
            ignore_set_default: true,
            ..Default::default()
        };
        let err = auto_detect(&manager, Duration::from_millis(800))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::DetectionTimeout { .. }));
    }

    #[tokio::test]
    async fn test_unbounded_timeout_still_detects() {
        let manager = FakeManager::with_registered(vec![kit("only")]);

        let target = auto_detect(&manager, Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(target.name, "only");
    }

    #[test]
    fn test_targets_from_value_shapes() {
        assert!(targets_from_value(None).is_empty());
        assert!(targets_from_value(Some(Value::String("  \n".into()))).is_empty());

        let lines = targets_from_value(Some(Value::String("kit-a\nkit-b\n".into())));
        assert_eq!(lines, vec![Target::new("kit-a", "kit-a"), Target::new("kit-b", "kit-b")]);

        let objects = targets_from_value(Some(serde_json::json!([
            { "name": "kit-a", "address": "10.0.0.1" },
            { "name": "kit-b" }
        ])));
        assert_eq!(
            objects,
            vec![Target::new("kit-a", "10.0.0.1"), Target::new("kit-b", "kit-b")]
        );
    }
}
