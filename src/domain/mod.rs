// ==========================================
// 定制橱柜车间 ERP - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、不变量
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod change_order;
pub mod impact;
pub mod project;
pub mod stop_action;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use change_order::{
    aggregate_totals, BomDelta, BomImpact, BomItem, ChangeOrder, ChangeOrderLine, NewChangeOrder,
    NewChangeOrderLine,
};
pub use impact::{FieldChange, ImpactPreview};
pub use project::{Project, PurchaseOrder, Task};
pub use stop_action::{ActiveStopActions, ChangeOrderStopAction, RevertSummary, StopActionSummary};
pub use types::{ChangeOrderReason, ChangeOrderStatus, PurchaseOrderState, StopActionType, TaskState};
