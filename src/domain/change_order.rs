// ==========================================
// 定制橱柜车间 ERP - 变更单领域模型
// ==========================================
// 职责: 变更单聚合 (ChangeOrder + ChangeOrderLine) 与金额/BOM 汇总
// 红线: price_delta / bom_delta 只能由行项目汇总得到,不得单独赋值
// 红线: 变更单不做物理删除,取消是终态
// ==========================================

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::types::{ChangeOrderReason, ChangeOrderStatus};

// ==========================================
// BomItem - 物料条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomItem {
    pub component_name: String,          // 物料名称
    #[serde(default)]
    pub product_id: Option<String>,      // 产品ID (可选)
    pub quantity: Decimal,               // 数量
    #[serde(default)]
    pub unit_of_measure: Option<String>, // 计量单位
}

impl BomItem {
    pub fn new(component_name: &str, quantity: Decimal) -> Self {
        Self {
            component_name: component_name.to_string(),
            product_id: None,
            quantity,
            unit_of_measure: None,
        }
    }
}

// ==========================================
// BomImpact - 单行 BOM 影响
// ==========================================
// 存储: change_order_line.bom_impact_json
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BomImpact {
    #[serde(default)]
    pub additions: Vec<BomItem>,
    #[serde(default)]
    pub removals: Vec<BomItem>,
}

impl BomImpact {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

// ==========================================
// BomDelta - 变更单 BOM 汇总
// ==========================================
// 按行顺序拼接,不去重
// 存储: change_order.bom_delta_json
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BomDelta {
    #[serde(default)]
    pub additions: Vec<BomItem>,
    #[serde(default)]
    pub removals: Vec<BomItem>,
}

// ==========================================
// ChangeOrder - 变更单
// ==========================================
// 对齐: change_order 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOrder {
    // ===== 主键与归属 =====
    pub change_order_id: String,
    pub project_id: String,
    pub change_order_number: String,

    // ===== 基本信息 =====
    pub title: String,
    pub description: Option<String>,
    pub reason: ChangeOrderReason,
    pub status: ChangeOrderStatus,
    pub affected_stage: Option<String>, // 影响的生产阶段 (外部阶段模型)
    pub unlocks_gate: Option<String>,   // 解锁的关口 (外部关口模型)

    // ===== 汇总 (只读, 由行项目计算) =====
    pub price_delta: Decimal,
    pub bom_delta: BomDelta,

    // ===== 申请 =====
    pub requested_by: String,
    pub requested_at: NaiveDateTime,

    // ===== 审批 =====
    pub approved_by: Option<String>,
    pub approved_at: Option<NaiveDateTime>,
    pub approval_notes: Option<String>,

    // ===== 驳回 =====
    pub rejected_by: Option<String>,
    pub rejected_at: Option<NaiveDateTime>,
    pub rejection_reason: Option<String>,

    // ===== 应用 =====
    pub applied_by: Option<String>,
    pub applied_at: Option<NaiveDateTime>,

    // ===== 取消 =====
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<NaiveDateTime>,

    // ===== 并发控制 =====
    pub revision: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ChangeOrder {
    /// 仅草稿可编辑 (增加行项目)
    pub fn can_be_edited(&self) -> bool {
        self.status == ChangeOrderStatus::Draft
    }

    pub fn can_be_submitted(&self) -> bool {
        self.status == ChangeOrderStatus::Draft
    }

    pub fn can_be_approved(&self) -> bool {
        self.status == ChangeOrderStatus::PendingApproval
    }

    pub fn can_be_rejected(&self) -> bool {
        self.status == ChangeOrderStatus::PendingApproval
    }

    pub fn can_be_applied(&self) -> bool {
        self.status == ChangeOrderStatus::Approved
    }

    /// 已进入终态 (applied / rejected / cancelled)
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }
}

// ==========================================
// ChangeOrderLine - 变更行项目
// ==========================================
// 对齐: change_order_line 表
// 说明: old_value 是建行时的快照, 应用时用于检测目标字段是否已被他人修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOrderLine {
    pub line_id: String,
    pub change_order_id: String,
    pub line_no: i32,

    // ===== 目标实体 (多态指针) =====
    pub entity_type: String,
    pub entity_id: String,
    pub field_name: String,

    // ===== 变更内容 =====
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub price_impact: Decimal,
    pub bom_impact: Option<BomImpact>,

    // ===== 应用状态 =====
    pub is_applied: bool,
    pub applied_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl ChangeOrderLine {
    /// 显示用实体标识, 如 "Cabinet #c-12"
    pub fn entity_label(&self) -> String {
        format!("{} #{}", self.entity_type, self.entity_id)
    }
}

// ==========================================
// 创建参数
// ==========================================

/// 新建变更单参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewChangeOrder {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reason: Option<ChangeOrderReason>,
    #[serde(default)]
    pub affected_stage: Option<String>,
    #[serde(default)]
    pub unlocks_gate: Option<String>,
    #[serde(default)]
    pub lines: Vec<NewChangeOrderLine>,
}

/// 新增行项目参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChangeOrderLine {
    pub entity_type: String,
    pub entity_id: String,
    pub field_name: String,
    pub new_value: Option<String>,
    #[serde(default)]
    pub price_impact: Decimal,
    #[serde(default)]
    pub bom_impact: Option<BomImpact>,
}

impl NewChangeOrderLine {
    pub fn new(entity_type: &str, entity_id: &str, field_name: &str, new_value: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            field_name: field_name.to_string(),
            new_value: Some(new_value.to_string()),
            price_impact: Decimal::ZERO,
            bom_impact: None,
        }
    }

    pub fn with_price_impact(mut self, price_impact: Decimal) -> Self {
        self.price_impact = price_impact;
        self
    }

    pub fn with_bom_impact(mut self, bom_impact: BomImpact) -> Self {
        self.bom_impact = Some(bom_impact);
        self
    }
}

// ==========================================
// 汇总计算
// ==========================================

/// 按行顺序汇总金额与 BOM 变化
///
/// - price_delta = Σ price_impact
/// - bom_delta = 各行 additions / removals 依次拼接 (不去重)
pub fn aggregate_totals(lines: &[ChangeOrderLine]) -> (Decimal, BomDelta) {
    let mut price_delta = Decimal::ZERO;
    let mut bom_delta = BomDelta::default();

    for line in lines {
        price_delta += line.price_impact;
        if let Some(impact) = &line.bom_impact {
            bom_delta.additions.extend(impact.additions.iter().cloned());
            bom_delta.removals.extend(impact.removals.iter().cloned());
        }
    }

    (price_delta, bom_delta)
}
