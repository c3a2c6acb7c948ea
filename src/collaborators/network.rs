use crate::core::error::Result;
use crate::core::model::{NetworkConfig, NetworkMode, NetworkState};

/// Network setup/teardown, consumed by the Supervisor. Bridge/veth/port-
/// mapping mechanics are an external collaborator per the core's scope — the
/// core only needs this interface and a state-recording implementation it
/// can drive before and after the init PID attaches.
pub trait NetworkManager {
    /// Ensure the shared bridge device for `mode = bridge` containers exists.
    /// Idempotent.
    fn ensure_bridge(&self, cfg: &NetworkConfig) -> Result<()>;

    /// Perform per-container network setup inside `pid`'s network namespace
    /// and return the resulting state to persist.
    fn setup(&self, id: &str, cfg: &NetworkConfig, pid: u32) -> Result<NetworkState>;

    /// Tear down whatever `setup` created. Best-effort: never fails loudly
    /// enough to mask a prior error already being surfaced by the caller.
    fn teardown(&self, id: &str, state: &NetworkState) -> Result<()>;
}

/// Default implementation: supports `mode = none` (no-op) and `mode =
/// bridge` at the level of recording state. The actual bridge/veth wiring is
/// out of the core's scope (spec §1); this implementation exists so the
/// Supervisor's Setup/Teardown call sites are exercised end-to-end even
/// before a real network driver is plugged in.
pub struct StubNetworkManager;

impl NetworkManager for StubNetworkManager {
    fn ensure_bridge(&self, cfg: &NetworkConfig) -> Result<()> {
        if cfg.mode != NetworkMode::Bridge {
            return Ok(());
        }
        log::debug!("ensure_bridge: bridge networking requested but no bridge driver is installed; recording mode only");
        Ok(())
    }

    fn setup(&self, id: &str, cfg: &NetworkConfig, pid: u32) -> Result<NetworkState> {
        log::info!("network setup for container {id} (pid {pid}), mode={:?}", cfg.mode);
        Ok(NetworkState {
            mode: cfg.mode.clone(),
            ports: cfg.ports.clone(),
            ..NetworkState::default()
        })
    }

    fn teardown(&self, id: &str, _state: &NetworkState) -> Result<()> {
        log::info!("network teardown for container {id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_mode_setup_is_recorded() {
        let mgr = StubNetworkManager;
        let cfg = NetworkConfig::default();
        let state = mgr.setup("abc", &cfg, 123).unwrap();
        assert_eq!(state.mode, NetworkMode::None);
    }
}
