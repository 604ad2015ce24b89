//! Device state the rules consult: active network and screen.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Wifi,
    Mobile,
    #[default]
    Offline,
}

impl NetworkType {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => NetworkType::Wifi,
            1 => NetworkType::Mobile,
            _ => NetworkType::Offline,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            NetworkType::Wifi => 0,
            NetworkType::Mobile => 1,
            NetworkType::Offline => 2,
        }
    }
}

/// Written by platform callbacks, read on every packet.
#[derive(Debug)]
pub struct NetworkState {
    network: AtomicU8,
    screen_on: AtomicBool,
}

impl NetworkState {
    pub fn new(network: NetworkType, screen_on: bool) -> Self {
        Self {
            network: AtomicU8::new(network.as_u8()),
            screen_on: AtomicBool::new(screen_on),
        }
    }

    pub fn network_type(&self) -> NetworkType {
        NetworkType::from_u8(self.network.load(Ordering::Relaxed))
    }

    pub fn set_network_type(&self, network: NetworkType) {
        self.network.store(network.as_u8(), Ordering::Relaxed);
    }

    pub fn is_screen_on(&self) -> bool {
        self.screen_on.load(Ordering::Relaxed)
    }

    pub fn set_screen_on(&self, on: bool) {
        self.screen_on.store(on, Ordering::Relaxed);
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new(NetworkType::Offline, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_are_visible() {
        let state = NetworkState::default();
        assert_eq!(state.network_type(), NetworkType::Offline);
        assert!(state.is_screen_on());

        state.set_network_type(NetworkType::Mobile);
        state.set_screen_on(false);
        assert_eq!(state.network_type(), NetworkType::Mobile);
        assert!(!state.is_screen_on());
    }
}
