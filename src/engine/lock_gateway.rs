// ==========================================
// 定制橱柜车间 ERP - 实体锁网关
// ==========================================
// 职责: 声明引擎对外部实体锁服务的依赖 (依赖倒置)
// 调用点:
// - 批准: unlock_for_change_order (在同一事务内, 止停动作之前)
// - 应用 / 取消已批准变更单: relock_after_change_order
// 说明: 网关返回错误时整个事务回滚
// ==========================================

use std::error::Error;

use crate::domain::change_order::{ChangeOrder, ChangeOrderLine};

/// 实体锁网关
pub trait EntityLockGateway: Send + Sync {
    /// 解锁变更单行项目涉及的实体, 返回解锁数量
    fn unlock_for_change_order(
        &self,
        change_order: &ChangeOrder,
        lines: &[ChangeOrderLine],
    ) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// 变更窗口结束后重新冻结实体, 返回冻结数量
    fn relock_after_change_order(
        &self,
        change_order: &ChangeOrder,
        lines: &[ChangeOrderLine],
    ) -> Result<usize, Box<dyn Error + Send + Sync>>;
}

/// 空操作锁网关 (未接入锁服务时使用)
#[derive(Debug, Clone, Default)]
pub struct NoOpLockGateway;

impl EntityLockGateway for NoOpLockGateway {
    fn unlock_for_change_order(
        &self,
        change_order: &ChangeOrder,
        lines: &[ChangeOrderLine],
    ) -> Result<usize, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpLockGateway: 跳过解锁 - change_order_id={}, lines={}",
            change_order.change_order_id,
            lines.len()
        );
        Ok(0)
    }

    fn relock_after_change_order(
        &self,
        change_order: &ChangeOrder,
        lines: &[ChangeOrderLine],
    ) -> Result<usize, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpLockGateway: 跳过重新冻结 - change_order_id={}, lines={}",
            change_order.change_order_id,
            lines.len()
        );
        Ok(0)
    }
}
