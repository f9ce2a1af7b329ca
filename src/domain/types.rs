// ==========================================
// 定制橱柜车间 ERP - 领域类型定义
// ==========================================
// 职责: 变更单状态、原因、任务/采购单状态、止停动作类型
// 存储格式: snake_case 字符串 (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 变更单状态 (Change Order Status)
// ==========================================
// 状态机: draft → pending_approval → approved → applied
//                                 ↘ rejected   ↘ cancelled
// 终态: applied / rejected / cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrderStatus {
    Draft,           // 草稿
    PendingApproval, // 待审批
    Approved,        // 已批准
    Applied,         // 已应用
    Rejected,        // 已驳回
    Cancelled,       // 已取消
}

impl ChangeOrderStatus {
    /// 转换为数据库存储字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOrderStatus::Draft => "draft",
            ChangeOrderStatus::PendingApproval => "pending_approval",
            ChangeOrderStatus::Approved => "approved",
            ChangeOrderStatus::Applied => "applied",
            ChangeOrderStatus::Rejected => "rejected",
            ChangeOrderStatus::Cancelled => "cancelled",
        }
    }

    /// 从数据库字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "draft" => Some(ChangeOrderStatus::Draft),
            "pending_approval" => Some(ChangeOrderStatus::PendingApproval),
            "approved" => Some(ChangeOrderStatus::Approved),
            "applied" => Some(ChangeOrderStatus::Applied),
            "rejected" => Some(ChangeOrderStatus::Rejected),
            "cancelled" => Some(ChangeOrderStatus::Cancelled),
            _ => None,
        }
    }

    /// 显示名称
    pub fn label(&self) -> &'static str {
        match self {
            ChangeOrderStatus::Draft => "Draft",
            ChangeOrderStatus::PendingApproval => "Pending Approval",
            ChangeOrderStatus::Approved => "Approved",
            ChangeOrderStatus::Applied => "Applied",
            ChangeOrderStatus::Rejected => "Rejected",
            ChangeOrderStatus::Cancelled => "Cancelled",
        }
    }

    /// 是否终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChangeOrderStatus::Applied | ChangeOrderStatus::Rejected | ChangeOrderStatus::Cancelled
        )
    }
}

impl fmt::Display for ChangeOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 变更原因 (Change Order Reason)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrderReason {
    #[default]
    ClientRequest,        // 客户要求
    DesignError,          // 设计错误
    FieldCondition,       // 现场条件
    MaterialSubstitution, // 材料替换
    ScopeAddition,        // 范围增加
    ScopeRemoval,         // 范围缩减
    Other,                // 其他
}

impl ChangeOrderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOrderReason::ClientRequest => "client_request",
            ChangeOrderReason::DesignError => "design_error",
            ChangeOrderReason::FieldCondition => "field_condition",
            ChangeOrderReason::MaterialSubstitution => "material_substitution",
            ChangeOrderReason::ScopeAddition => "scope_addition",
            ChangeOrderReason::ScopeRemoval => "scope_removal",
            ChangeOrderReason::Other => "other",
        }
    }

    /// 未知值回落为 Other
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "client_request" => ChangeOrderReason::ClientRequest,
            "design_error" => ChangeOrderReason::DesignError,
            "field_condition" | "site_condition" => ChangeOrderReason::FieldCondition,
            "material_substitution" => ChangeOrderReason::MaterialSubstitution,
            "scope_addition" => ChangeOrderReason::ScopeAddition,
            "scope_removal" => ChangeOrderReason::ScopeRemoval,
            _ => ChangeOrderReason::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChangeOrderReason::ClientRequest => "Client Request",
            ChangeOrderReason::DesignError => "Design Error",
            ChangeOrderReason::FieldCondition => "Field Condition",
            ChangeOrderReason::MaterialSubstitution => "Material Substitution",
            ChangeOrderReason::ScopeAddition => "Scope Addition",
            ChangeOrderReason::ScopeRemoval => "Scope Removal",
            ChangeOrderReason::Other => "Other",
        }
    }
}

impl fmt::Display for ChangeOrderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 生产任务状态 (Task State)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,    // 待开始
    InProgress, // 进行中
    Approved,   // 已确认
    Blocked,    // 变更阻断
    Done,       // 已完成
    Cancelled,  // 已取消
}

impl TaskState {
    /// 可被变更单中断的状态
    pub const INTERRUPTIBLE: [TaskState; 3] =
        [TaskState::Pending, TaskState::InProgress, TaskState::Approved];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Approved => "approved",
            TaskState::Blocked => "blocked",
            TaskState::Done => "done",
            TaskState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "pending" => Some(TaskState::Pending),
            "in_progress" => Some(TaskState::InProgress),
            "approved" => Some(TaskState::Approved),
            "blocked" => Some(TaskState::Blocked),
            "done" => Some(TaskState::Done),
            "cancelled" => Some(TaskState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 采购单状态 (Purchase Order State)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderState {
    Draft,    // 询价草稿
    Sent,     // 已发送
    Purchase, // 已下单
    OnHold,   // 变更挂起
    Done,     // 已完成
    Cancel,   // 已取消
}

impl PurchaseOrderState {
    /// 可被挂起的状态
    pub const HOLDABLE: [PurchaseOrderState; 3] = [
        PurchaseOrderState::Draft,
        PurchaseOrderState::Sent,
        PurchaseOrderState::Purchase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderState::Draft => "draft",
            PurchaseOrderState::Sent => "sent",
            PurchaseOrderState::Purchase => "purchase",
            PurchaseOrderState::OnHold => "on_hold",
            PurchaseOrderState::Done => "done",
            PurchaseOrderState::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "draft" => Some(PurchaseOrderState::Draft),
            "sent" => Some(PurchaseOrderState::Sent),
            "purchase" => Some(PurchaseOrderState::Purchase),
            "on_hold" => Some(PurchaseOrderState::OnHold),
            "done" => Some(PurchaseOrderState::Done),
            "cancel" => Some(PurchaseOrderState::Cancel),
            _ => None,
        }
    }
}

impl fmt::Display for PurchaseOrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 止停动作类型 (Stop Action Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopActionType {
    TaskBlocked,     // 阻断生产任务
    PoHeld,          // 挂起采购单
    DeliveryBlocked, // 阻断交付
}

impl StopActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopActionType::TaskBlocked => "task_blocked",
            StopActionType::PoHeld => "po_held",
            StopActionType::DeliveryBlocked => "delivery_blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "task_blocked" => Some(StopActionType::TaskBlocked),
            "po_held" => Some(StopActionType::PoHeld),
            "delivery_blocked" => Some(StopActionType::DeliveryBlocked),
            _ => None,
        }
    }

    /// 目标实体类型标签
    pub fn entity_type(&self) -> &'static str {
        match self {
            StopActionType::TaskBlocked => "Task",
            StopActionType::PoHeld => "PurchaseOrder",
            StopActionType::DeliveryBlocked => "Project",
        }
    }
}

impl fmt::Display for StopActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
