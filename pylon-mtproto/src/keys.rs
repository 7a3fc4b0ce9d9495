//! Per-datacenter authorization state: permanent and temporary keys,
//! the current salt and clock correction.
//!
//! Which key signs the wire is an explicit enum choice, not a property
//! of the key object itself; callers switch it when a temp key finishes
//! binding or expires.

use std::collections::HashMap;

use pylon_crypto::AuthKey;

/// Which key a session currently uses for wire encryption.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum AuthKeyRef {
    /// No key yet; only plaintext handshake traffic is possible.
    #[default]
    None,
    Perm,
    Temp,
}

/// A temporary key with its lifetime and binding status.
#[derive(Clone, Debug)]
pub struct TempKey {
    pub key: AuthKey,
    /// Unix time after which the server forgets this key.
    pub expires_at: i64,
    /// Set once `auth.bindTempAuthKey` succeeded.
    pub bound: bool,
}

impl TempKey {
    pub fn expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Authorization state for one datacenter.
#[derive(Clone, Debug, Default)]
pub struct AuthInfo {
    perm: Option<AuthKey>,
    temp: Option<TempKey>,
    active: AuthKeyRef,
    pub salt: i64,
    pub time_offset: i32,
}

impl AuthInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_perm_key(&mut self, key: AuthKey) {
        self.perm = Some(key);
        if self.active == AuthKeyRef::None {
            self.active = AuthKeyRef::Perm;
        }
    }

    /// Installs a freshly negotiated temp key. It immediately becomes
    /// the wire key so the binding request itself travels under it.
    pub fn set_temp_key(&mut self, key: AuthKey, expires_at: i64) {
        self.temp = Some(TempKey {
            key,
            expires_at,
            bound: false,
        });
        self.active = AuthKeyRef::Temp;
    }

    pub fn mark_temp_bound(&mut self) {
        if let Some(temp) = &mut self.temp {
            temp.bound = true;
        }
    }

    pub fn perm_key(&self) -> Option<&AuthKey> {
        self.perm.as_ref()
    }

    pub fn temp_key(&self) -> Option<&TempKey> {
        self.temp.as_ref()
    }

    pub fn active(&self) -> AuthKeyRef {
        self.active
    }

    /// The key that signs outgoing frames, per the active selector.
    pub fn wire_key(&self) -> Option<&AuthKey> {
        match self.active {
            AuthKeyRef::None => None,
            AuthKeyRef::Perm => self.perm.as_ref(),
            AuthKeyRef::Temp => self.temp.as_ref().map(|temp| &temp.key),
        }
    }

    /// Drops an expired temp key, falling back to the permanent key if
    /// one exists. Returns true when a drop happened.
    pub fn evict_expired_temp(&mut self, now: i64) -> bool {
        let expired = self.temp.as_ref().is_some_and(|temp| temp.expired(now));
        if expired {
            self.temp = None;
            self.active = if self.perm.is_some() {
                AuthKeyRef::Perm
            } else {
                AuthKeyRef::None
            };
        }
        expired
    }

    /// Full reset after the server reports the key unknown (`-404`).
    pub fn reset(&mut self) {
        self.perm = None;
        self.temp = None;
        self.active = AuthKeyRef::None;
        self.salt = 0;
    }
}

/// Authorization state for every datacenter, keyed by DC id.
#[derive(Clone, Debug, Default)]
pub struct KeyStore {
    infos: HashMap<i32, AuthInfo>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auth_info(&self, dc_id: i32) -> Option<&AuthInfo> {
        self.infos.get(&dc_id)
    }

    pub fn auth_info_mut(&mut self, dc_id: i32) -> &mut AuthInfo {
        self.infos.entry(dc_id).or_default()
    }
}
