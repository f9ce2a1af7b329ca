// ==========================================
// 定制橱柜车间 ERP - 变更单引擎错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类:
// - 非法迁移: 立即拒绝, 不产生任何部分写入
// - 并发冲突: 状态 compare-and-swap 失败, 整个事务回滚
// - 仓储错误: 透传
// 说明: 目标实体缺失不是错误, 由服务层告警后跳过
// ==========================================

use thiserror::Error;

use crate::domain::types::ChangeOrderStatus;
use crate::repository::error::RepositoryError;

#[derive(Error, Debug)]
pub enum ChangeOrderError {
    // ===== 状态机错误 =====
    #[error("非法状态迁移: change_order_id={change_order_id}, 当前状态={from}, 操作={action}")]
    InvalidTransition {
        change_order_id: String,
        from: ChangeOrderStatus,
        action: &'static str,
    },

    #[error("变更单不可编辑: change_order_id={change_order_id}, 当前状态={status}")]
    NotEditable {
        change_order_id: String,
        status: ChangeOrderStatus,
    },

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    // ===== 并发控制错误 =====
    #[error("项目已有其他变更单在级联中: project_id={project_id}, active_change_order_id={active_change_order_id}")]
    ActiveChangeOrderConflict {
        project_id: String,
        active_change_order_id: String,
    },

    #[error("变更单已被并发修改: change_order_id={change_order_id}")]
    ConcurrentModification { change_order_id: String },

    // ===== 应用错误 =====
    #[error("行项目旧值已过期: line_id={line_id}, {entity}.{field} 快照={expected:?}, 当前={actual:?}")]
    StaleLineValue {
        line_id: String,
        entity: String,
        field: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    // ===== 外部网关错误 =====
    #[error("实体锁网关调用失败: {0}")]
    LockGateway(String),

    // ===== 参数校验 / 配置 =====
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("配置读取失败: {0}")]
    Config(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for ChangeOrderError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure { change_order_id, .. } => {
                ChangeOrderError::ConcurrentModification { change_order_id }
            }
            RepositoryError::NotFound { entity, id } => ChangeOrderError::NotFound { entity, id },
            other => ChangeOrderError::Repository(other),
        }
    }
}

impl From<rusqlite::Error> for ChangeOrderError {
    fn from(err: rusqlite::Error) -> Self {
        RepositoryError::from(err).into()
    }
}

/// Result 类型别名
pub type ChangeOrderResult<T> = Result<T, ChangeOrderError>;
