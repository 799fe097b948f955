//! Wire types for the envoy REST/SSE surface.
//!
//! Everything here is plain data: the orchestration runtime in
//! `envoy-core` produces these values and the HTTP layer in `envoy-api`
//! serializes them. Keeping them in a leaf crate lets tests and fakes
//! construct payloads without pulling in the runtime.

mod auth;
mod host;
mod sidecar;
mod sleeve;
mod system;
mod workspace;

pub use auth::{
    AuthCheckInfo, AuthCheckResult, AuthCheckStatus, AuthLoginRequest, AuthLoginResult,
    AuthMethod, AuthProvider, AuthRevokeResult, AuthState, AuthStatus, ProviderAuthState,
    ProviderAuthStatus,
};
pub use host::{ContainerCapacity, CpuStats, DiskStats, HostStats, MemoryStats};
pub use sidecar::{
    SidecarAuthInfo, SidecarDhf, SidecarProcessInfo, SidecarStatus, SidecarWorkspaceInfo,
};
pub use sleeve::{ContainerResourceStats, SleeveInfo, SpawnSleeveRequest};
pub use system::{ContainerSummary, DoctorCheck, DoctorStatus, NetworkSummary};
pub use workspace::{
    BranchList, CloneJob, CloneStatus, CloneWorkspaceRequest, CstackInitRequest,
    CstackInitResult, CstackStats, OpResult, SwitchBranchRequest, WorkspaceGitInfo,
    WorkspaceInfo,
};
