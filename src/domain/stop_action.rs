// ==========================================
// 定制橱柜车间 ERP - 止停动作审计模型
// ==========================================
// 职责: 记录变更单批准时对任务/采购单/交付的阻断, 以及撤销信息
// 红线: 同一 (change_order, entity_type, entity_id) 同时最多一条有效记录
// 红线: 永不删除, 撤销只打标记 (reverted_by / reverted_at)
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::StopActionType;

// ==========================================
// ChangeOrderStopAction - 止停动作记录
// ==========================================
// 对齐: change_order_stop_action 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOrderStopAction {
    pub stop_action_id: String,
    pub change_order_id: String,
    pub action_type: StopActionType,
    pub entity_type: String,
    pub entity_id: String,
    pub previous_state: Option<String>,
    pub new_state: String,
    pub performed_by: String,
    pub performed_at: NaiveDateTime,
    pub reverted_by: Option<String>,
    pub reverted_at: Option<NaiveDateTime>,
}

impl ChangeOrderStopAction {
    /// 创建新的有效记录
    pub fn new(
        change_order_id: &str,
        action_type: StopActionType,
        entity_id: &str,
        previous_state: Option<String>,
        new_state: &str,
        performed_by: &str,
    ) -> Self {
        Self {
            stop_action_id: uuid::Uuid::new_v4().to_string(),
            change_order_id: change_order_id.to_string(),
            action_type,
            entity_type: action_type.entity_type().to_string(),
            entity_id: entity_id.to_string(),
            previous_state,
            new_state: new_state.to_string(),
            performed_by: performed_by.to_string(),
            performed_at: chrono::Local::now().naive_local(),
            reverted_by: None,
            reverted_at: None,
        }
    }

    /// 是否仍有效 (未撤销)
    pub fn is_active(&self) -> bool {
        self.reverted_at.is_none()
    }
}

// ==========================================
// 执行 / 撤销结果
// ==========================================

/// 批准时执行止停动作的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopActionSummary {
    pub tasks_blocked: usize,
    pub pos_held: usize,
    pub delivery_blocked: bool,
}

impl StopActionSummary {
    pub fn total(&self) -> usize {
        self.tasks_blocked + self.pos_held + usize::from(self.delivery_blocked)
    }
}

/// 撤销止停动作的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertSummary {
    pub tasks_unblocked: usize,
    pub pos_released: usize,
    pub delivery_unblocked: bool,
    /// 目标实体已不存在、仅标记撤销的记录数
    pub missing_entities: usize,
    /// 撤销后重新级联的仍处于 approved 的变更单
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recascaded_change_order_id: Option<String>,
}

impl RevertSummary {
    pub fn is_noop(&self) -> bool {
        self.tasks_unblocked == 0
            && self.pos_released == 0
            && !self.delivery_unblocked
            && self.missing_entities == 0
    }
}

/// 当前有效止停动作统计 (只读)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStopActions {
    pub tasks_blocked: usize,
    pub pos_held: usize,
    pub delivery_blocked: bool,
    pub total_active: usize,
}

impl ActiveStopActions {
    pub fn has_active(&self) -> bool {
        self.total_active > 0
    }
}
