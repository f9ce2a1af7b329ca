// ==========================================
// 定制橱柜车间 ERP - 变更单生命周期引擎
// ==========================================
// 技术栈: Rust + SQLite
// 范围: 变更单状态机、行项目汇总、止停动作级联与审计
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 状态机与级联
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ChangeOrderReason, ChangeOrderStatus, PurchaseOrderState, StopActionType, TaskState,
};

// 领域实体
pub use domain::{
    ActionLog, ActionType, ActiveStopActions, BomDelta, BomImpact, BomItem, ChangeOrder,
    ChangeOrderLine, ChangeOrderStopAction, ImpactPreview, NewChangeOrder, NewChangeOrderLine,
    RevertSummary, StopActionSummary,
};

// 引擎
pub use engine::{ChangeOrderError, ChangeOrderResult, ChangeOrderService, StopActionService};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "定制橱柜车间 ERP - 变更单引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
