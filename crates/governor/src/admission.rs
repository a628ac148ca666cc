use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use metrics::{counter, gauge};
use serde::Serialize;
use tracing::{debug, info, warn};

use taskplane_core::models::{
    CpuQuantity, InstanceKind, LimitRange, MemoryQuantity, NamespaceUsage, ResourceQuota,
    ResourceSpec,
};
use taskplane_core::{AdmissionError, TaskplaneResult};

use crate::reservation::Reservation;

/// 补齐默认值后的实例资源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedResources {
    pub cpu_request: Option<CpuQuantity>,
    pub cpu_limit: Option<CpuQuantity>,
    pub memory_request: Option<MemoryQuantity>,
    pub memory_limit: Option<MemoryQuantity>,
}

impl ResolvedResources {
    fn cpu_millis(&self) -> u64 {
        self.cpu_request.map_or(0, CpuQuantity::as_millis)
    }

    fn memory_bytes(&self) -> u64 {
        self.memory_request.map_or(0, MemoryQuantity::as_bytes)
    }
}

struct NamespaceState {
    quota: ResourceQuota,
    limit_range: LimitRange,
    usage: NamespaceUsage,
}

#[derive(Default)]
pub(crate) struct GovernorState {
    namespaces: HashMap<String, NamespaceState>,
}

impl GovernorState {
    pub(crate) fn release(
        &mut self,
        namespace: &str,
        kind: InstanceKind,
        resources: &ResolvedResources,
    ) {
        let Some(ns) = self.namespaces.get_mut(namespace) else {
            return;
        };
        let usage = &mut ns.usage;
        usage.cpu_millis = usage.cpu_millis.saturating_sub(resources.cpu_millis());
        usage.memory_bytes = usage.memory_bytes.saturating_sub(resources.memory_bytes());
        match kind {
            InstanceKind::Worker => usage.workers = usage.workers.saturating_sub(1),
            InstanceKind::Scheduler => usage.schedulers = usage.schedulers.saturating_sub(1),
        }
        debug!(namespace, kind = kind.as_str(), "归还资源配额");
        record_usage(usage);
    }
}

/// 资源准入控制器
///
/// 聚合用量是唯一跨组件共享的可变状态，所有检查与提交都在同一把锁内完成，
/// 并发准入不会超出配额。
#[derive(Clone, Default)]
pub struct Governor {
    state: Arc<Mutex<GovernorState>>,
}

impl Governor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（或替换）命名空间的配额策略，已有的用量保留
    pub fn register_namespace(
        &self,
        namespace: impl Into<String>,
        quota: ResourceQuota,
        limit_range: LimitRange,
    ) {
        let namespace = namespace.into();
        let mut state = self.lock();
        let usage = state
            .namespaces
            .remove(&namespace)
            .map(|ns| ns.usage)
            .unwrap_or_else(|| NamespaceUsage {
                namespace: namespace.clone(),
                ..NamespaceUsage::default()
            });
        info!(namespace = %namespace, ?quota, "注册命名空间资源配额");
        state.namespaces.insert(
            namespace,
            NamespaceState {
                quota,
                limit_range,
                usage,
            },
        );
    }

    pub fn with_namespace(
        self,
        namespace: impl Into<String>,
        quota: ResourceQuota,
        limit_range: LimitRange,
    ) -> Self {
        self.register_namespace(namespace, quota, limit_range);
        self
    }

    /// 按LimitRange补齐默认值并检查取值范围，不占用配额
    pub fn resolve(
        &self,
        namespace: &str,
        spec: &ResourceSpec,
    ) -> Result<ResolvedResources, AdmissionError> {
        let state = self.lock();
        let ns = state
            .namespaces
            .get(namespace)
            .ok_or_else(|| AdmissionError::UnknownNamespace(namespace.to_string()))?;
        resolve_with(&ns.limit_range, spec)
    }

    /// 准入检查并原子地提交预留
    pub fn admit(
        &self,
        namespace: &str,
        kind: InstanceKind,
        spec: &ResourceSpec,
    ) -> Result<Reservation, AdmissionError> {
        let result = self.try_commit(namespace, kind, spec);
        match &result {
            Ok(reservation) => {
                counter!(
                    "taskplane_admissions_total",
                    "namespace" => namespace.to_string(),
                    "kind" => kind.as_str()
                )
                .increment(1);
                debug!(namespace, kind = kind.as_str(), resources = ?reservation.resources(), "准入通过");
            }
            Err(err) => {
                counter!(
                    "taskplane_admission_rejections_total",
                    "namespace" => namespace.to_string(),
                    "kind" => kind.as_str(),
                    "reason" => err.reason()
                )
                .increment(1);
                warn!(namespace, kind = kind.as_str(), error = %err, "准入被拒绝");
            }
        }
        result
    }

    /// 准入与实例创建一起提交：创建失败时预留自动回滚
    pub async fn admit_and_create<T, F, Fut>(
        &self,
        namespace: &str,
        kind: InstanceKind,
        spec: &ResourceSpec,
        create: F,
    ) -> TaskplaneResult<(T, Reservation)>
    where
        F: FnOnce(ResolvedResources) -> Fut,
        Fut: Future<Output = TaskplaneResult<T>>,
    {
        let reservation = self.admit(namespace, kind, spec)?;
        match create(*reservation.resources()).await {
            Ok(created) => Ok((created, reservation)),
            Err(err) => {
                warn!(namespace, kind = kind.as_str(), error = %err, "实例创建失败，回滚资源预留");
                reservation.release();
                Err(err)
            }
        }
    }

    /// 命名空间当前用量快照
    pub fn usage(&self, namespace: &str) -> Option<NamespaceUsage> {
        self.lock()
            .namespaces
            .get(namespace)
            .map(|ns| ns.usage.clone())
    }

    pub fn all_usage(&self) -> Vec<NamespaceUsage> {
        let mut usage: Vec<_> = self
            .lock()
            .namespaces
            .values()
            .map(|ns| ns.usage.clone())
            .collect();
        usage.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        usage
    }

    pub fn quota(&self, namespace: &str) -> Option<ResourceQuota> {
        self.lock().namespaces.get(namespace).map(|ns| ns.quota)
    }

    fn try_commit(
        &self,
        namespace: &str,
        kind: InstanceKind,
        spec: &ResourceSpec,
    ) -> Result<Reservation, AdmissionError> {
        let mut state = self.lock();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| AdmissionError::UnknownNamespace(namespace.to_string()))?;

        let resources = resolve_with(&ns.limit_range, spec)?;
        check_quota(namespace, &ns.quota, &ns.usage, kind, &resources)?;

        let usage = &mut ns.usage;
        usage.cpu_millis += resources.cpu_millis();
        usage.memory_bytes += resources.memory_bytes();
        match kind {
            InstanceKind::Worker => usage.workers += 1,
            InstanceKind::Scheduler => usage.schedulers += 1,
        }
        record_usage(usage);

        Ok(Reservation::new(
            Arc::downgrade(&self.state),
            namespace.to_string(),
            kind,
            resources,
        ))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn resolve_with(range: &LimitRange, spec: &ResourceSpec) -> Result<ResolvedResources, AdmissionError> {
    let cpu_limit = spec.limits.cpu.or(range.default.cpu);
    let cpu_request = spec
        .requests
        .cpu
        .or(spec.limits.cpu)
        .or(range.default_request.cpu)
        .or(cpu_limit);
    let memory_limit = spec.limits.memory.or(range.default.memory);
    let memory_request = spec
        .requests
        .memory
        .or(spec.limits.memory)
        .or(range.default_request.memory)
        .or(memory_limit);

    let resolved = ResolvedResources {
        cpu_request,
        cpu_limit,
        memory_request,
        memory_limit,
    };

    let cpu_bounds = (
        range.min.cpu.map(CpuQuantity::as_millis),
        range.max.cpu.map(CpuQuantity::as_millis),
    );
    for value in [cpu_request, cpu_limit].into_iter().flatten() {
        check_bounds("cpu", value.as_millis(), cpu_bounds)?;
    }
    let memory_bounds = (
        range.min.memory.map(MemoryQuantity::as_bytes),
        range.max.memory.map(MemoryQuantity::as_bytes),
    );
    for value in [memory_request, memory_limit].into_iter().flatten() {
        check_bounds("memory", value.as_bytes(), memory_bounds)?;
    }

    if let (Some(request), Some(limit)) = (cpu_request, cpu_limit) {
        if request > limit {
            return Err(AdmissionError::RequestExceedsLimit {
                resource: "cpu".to_string(),
                request: request.as_millis(),
                limit: limit.as_millis(),
            });
        }
    }
    if let (Some(request), Some(limit)) = (memory_request, memory_limit) {
        if request > limit {
            return Err(AdmissionError::RequestExceedsLimit {
                resource: "memory".to_string(),
                request: request.as_bytes(),
                limit: limit.as_bytes(),
            });
        }
    }

    Ok(resolved)
}

fn check_bounds(
    resource: &str,
    value: u64,
    (min, max): (Option<u64>, Option<u64>),
) -> Result<(), AdmissionError> {
    let lower = min.unwrap_or(0);
    let upper = max.unwrap_or(u64::MAX);
    if value < lower || value > upper {
        return Err(AdmissionError::LimitOutOfRange {
            resource: resource.to_string(),
            value,
            min: lower,
            max: upper,
        });
    }
    Ok(())
}

fn check_quota(
    namespace: &str,
    quota: &ResourceQuota,
    usage: &NamespaceUsage,
    kind: InstanceKind,
    resources: &ResolvedResources,
) -> Result<(), AdmissionError> {
    let exceeded = |resource: &str, requested: u64, used: u64, hard: u64| {
        if used.saturating_add(requested) > hard {
            Err(AdmissionError::QuotaExceeded {
                namespace: namespace.to_string(),
                resource: resource.to_string(),
                requested,
                used,
                hard,
            })
        } else {
            Ok(())
        }
    };

    if let Some(hard) = quota.cpu {
        exceeded("cpu", resources.cpu_millis(), usage.cpu_millis, hard.as_millis())?;
    }
    if let Some(hard) = quota.memory {
        exceeded(
            "memory",
            resources.memory_bytes(),
            usage.memory_bytes,
            hard.as_bytes(),
        )?;
    }
    match kind {
        InstanceKind::Worker => {
            if let Some(hard) = quota.workers {
                exceeded("workers", 1, u64::from(usage.workers), u64::from(hard))?;
            }
        }
        InstanceKind::Scheduler => {
            if let Some(hard) = quota.schedulers {
                exceeded("schedulers", 1, u64::from(usage.schedulers), u64::from(hard))?;
            }
        }
    }
    Ok(())
}

fn record_usage(usage: &NamespaceUsage) {
    let ns = usage.namespace.clone();
    gauge!("taskplane_quota_used_cpu_millis", "namespace" => ns.clone())
        .set(usage.cpu_millis as f64);
    gauge!("taskplane_quota_used_memory_bytes", "namespace" => ns.clone())
        .set(usage.memory_bytes as f64);
    gauge!("taskplane_quota_used_workers", "namespace" => ns.clone()).set(f64::from(usage.workers));
    gauge!("taskplane_quota_used_schedulers", "namespace" => ns).set(f64::from(usage.schedulers));
}
