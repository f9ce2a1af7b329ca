// ==========================================
// 定制橱柜车间 ERP - 通知网关
// ==========================================
// 职责: 提交 / 批准 / 应用 / 取消 时通知相关人员
// 红线: fire-and-forget, 通知失败只记录日志, 不影响工作流状态
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;

use crate::domain::change_order::ChangeOrder;
use crate::domain::stop_action::StopActionSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Submitted,
    Approved,
    Applied,
    Cancelled,
}

/// 通知消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOrderNotification {
    pub kind: NotificationKind,
    pub change_order_id: String,
    pub project_id: String,
    pub actor: String,
    pub message: String,
}

impl ChangeOrderNotification {
    pub fn submitted(co: &ChangeOrder, actor: &str) -> Self {
        Self::build(
            NotificationKind::Submitted,
            co,
            actor,
            format!("变更单 {} 「{}」已提交审批", co.change_order_number, co.title),
        )
    }

    pub fn approved(co: &ChangeOrder, actor: &str, summary: &StopActionSummary) -> Self {
        let delivery = if summary.delivery_blocked { "，交付已阻断" } else { "" };
        Self::build(
            NotificationKind::Approved,
            co,
            actor,
            format!(
                "变更单 {} 已批准：阻断任务 {} 个，挂起采购单 {} 张{}",
                co.change_order_number, summary.tasks_blocked, summary.pos_held, delivery
            ),
        )
    }

    pub fn applied(co: &ChangeOrder, actor: &str) -> Self {
        Self::build(
            NotificationKind::Applied,
            co,
            actor,
            format!("变更单 {} 已应用，相关工作已恢复", co.change_order_number),
        )
    }

    pub fn cancelled(co: &ChangeOrder, actor: &str) -> Self {
        Self::build(
            NotificationKind::Cancelled,
            co,
            actor,
            format!("变更单 {} 已取消", co.change_order_number),
        )
    }

    fn build(kind: NotificationKind, co: &ChangeOrder, actor: &str, message: String) -> Self {
        Self {
            kind,
            change_order_id: co.change_order_id.clone(),
            project_id: co.project_id.clone(),
            actor: actor.to_string(),
            message,
        }
    }
}

/// 通知网关
pub trait NotificationGateway: Send + Sync {
    fn notify(&self, notification: &ChangeOrderNotification) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 仅写日志的通知实现
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl NotificationGateway for TracingNotifier {
    fn notify(&self, notification: &ChangeOrderNotification) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::info!(
            change_order_id = %notification.change_order_id,
            project_id = %notification.project_id,
            kind = ?notification.kind,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// 发送通知, 失败仅告警
pub fn notify_best_effort(gateway: &dyn NotificationGateway, notification: ChangeOrderNotification) {
    if let Err(e) = gateway.notify(&notification) {
        tracing::warn!(
            change_order_id = %notification.change_order_id,
            kind = ?notification.kind,
            error = %e,
            "变更单通知发送失败（已忽略）"
        );
    }
}
