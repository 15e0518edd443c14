//! Flow Synchronization Daemon for the vnet agent
//!
//! This crate implements the OpenFlow control subsystem of a
//! hypervisor-local virtual-network agent: it keeps a local software
//! switch's flow and group tables converged with the desired state
//! computed by upstream producers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────────┐      ┌─────────────┐
//! │  rule producers  │      │      flowsyncd       │      │   switch    │
//! │  (out of scope)  │      │                      │      │             │
//! │                  │─────▶│  FlowTable (desired) │      │ flow tables │
//! │  add_flow        │      │  GroupTable          │      │ group table │
//! │  remove_flows    │      │        │             │      │             │
//! │  set_flow        │      │        ▼             │      │ Geneve TLV  │
//! │                  │      │  Ofctrl ── reconcile │◀────▶│ option table│
//! └──────────────────┘      │        │             │      │             │
//!                           │        ▼             │      └─────────────┘
//!                           │  Rconn (OpenFlow 13) │   unix:<run>/<br>.mgmt
//!                           └──────────────────────┘
//! ```
//!
//! The event loop calls [`Ofctrl::run`] then [`Ofctrl::put`] once per
//! tick. `run` maintains the connection and negotiates a Geneve
//! tunnel-metadata slot; `put` diffs installed against desired flows and
//! groups and queues the minimal set of modifications, deferring under
//! back-pressure. The whole core is single-threaded and never blocks:
//! the switch itself is the authoritative cache, so nothing persists
//! across restarts.

pub mod config;
pub mod error;
pub mod flow_table;
pub mod group_table;
pub mod metrics;
pub mod ofctrl;
pub mod ratelimit;
pub mod rconn;
pub mod types;

pub use config::AgentConfig;
pub use error::{FlowsyncError, Result};
pub use flow_table::{AddOutcome, Flow, FlowKey, FlowTable};
pub use group_table::{GroupSet, GroupTable, MAX_GROUPS};
pub use metrics::MetricsCollector;
pub use ofctrl::{
    Ofctrl, BASE_TUN_METADATA_FIELD, GENEVE_OPTION_CLASS, GENEVE_OPTION_LEN, GENEVE_OPTION_TYPE,
    MAX_TUN_METADATA_SLOTS,
};
pub use ratelimit::RateLimiter;
pub use rconn::{PacketCounter, Rconn};
pub use types::Uuid;
