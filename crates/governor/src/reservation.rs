use std::fmt;
use std::sync::Weak;

use taskplane_core::models::InstanceKind;

use crate::admission::{GovernorState, ResolvedResources};

/// 一次成功准入所占用的配额
///
/// 持有期间资源计入命名空间的聚合用量；调用 [`Reservation::release`]
/// 或直接丢弃都会归还配额，且只归还一次。
pub struct Reservation {
    state: Weak<std::sync::Mutex<GovernorState>>,
    namespace: String,
    kind: InstanceKind,
    resources: ResolvedResources,
    released: bool,
}

impl Reservation {
    pub(crate) fn new(
        state: Weak<std::sync::Mutex<GovernorState>>,
        namespace: String,
        kind: InstanceKind,
        resources: ResolvedResources,
    ) -> Self {
        Self {
            state,
            namespace,
            kind,
            resources,
            released: false,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    /// 准入时补齐默认值后的资源
    pub fn resources(&self) -> &ResolvedResources {
        &self.resources
    }

    /// 主动归还配额
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.release(&self.namespace, self.kind, &self.resources);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("namespace", &self.namespace)
            .field("kind", &self.kind)
            .field("resources", &self.resources)
            .field("released", &self.released)
            .finish()
    }
}
