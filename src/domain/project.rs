// ==========================================
// 定制橱柜车间 ERP - 项目 / 任务 / 采购单
// ==========================================
// 职责: 变更单级联所触及的外部实体 (只含级联需要的字段)
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::{PurchaseOrderState, TaskState};

// ==========================================
// Project - 项目
// ==========================================
// 说明: has_pending_change_order / active_change_order_id / delivery_blocked
//       镜像当前正在级联的唯一变更单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub project_number: Option<String>,
    pub stage_key: Option<String>,
    pub has_pending_change_order: bool,
    pub active_change_order_id: Option<String>,
    pub delivery_blocked: bool,
    pub updated_at: NaiveDateTime,
}

impl Project {
    /// 是否有其他变更单正在级联
    pub fn is_cascading_other(&self, change_order_id: &str) -> bool {
        matches!(&self.active_change_order_id, Some(active) if active != change_order_id)
    }
}

// ==========================================
// Task - 生产任务
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub project_id: String,
    pub title: String,
    pub state: TaskState,
    pub blocked_by_change_order_id: Option<String>,
    pub state_before_block: Option<String>,
}

// ==========================================
// PurchaseOrder - 采购单
// ==========================================
// 说明: project_id 为显式外键; origin 为历史自由文本 (仅作兜底匹配)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub purchase_order_id: String,
    pub project_id: Option<String>,
    pub origin: Option<String>,
    pub state: PurchaseOrderState,
    pub held_by_change_order_id: Option<String>,
    pub held_at: Option<NaiveDateTime>,
    pub held_by: Option<String>,
    pub state_before_hold: Option<String>,
}
