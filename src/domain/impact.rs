// ==========================================
// 定制橱柜车间 ERP - 变更影响预览
// ==========================================
// 用途: 审批界面展示 (只读)
// ==========================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::change_order::{ChangeOrder, ChangeOrderLine};

/// 单个字段变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub entity: String, // 如 "Cabinet #c-12"
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// 变更单影响预览
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactPreview {
    pub lines_count: usize,
    pub price_delta: Decimal,
    pub bom_additions: usize,
    pub bom_removals: usize,
    pub affected_entities: BTreeMap<String, usize>, // entity_type → 行数
    pub field_changes: Vec<FieldChange>,
}

impl ImpactPreview {
    pub fn build(change_order: &ChangeOrder, lines: &[ChangeOrderLine]) -> Self {
        let mut affected_entities: BTreeMap<String, usize> = BTreeMap::new();
        for line in lines {
            *affected_entities.entry(line.entity_type.clone()).or_insert(0) += 1;
        }

        let field_changes = lines
            .iter()
            .map(|line| FieldChange {
                entity: line.entity_label(),
                field: line.field_name.clone(),
                old: line.old_value.clone(),
                new: line.new_value.clone(),
            })
            .collect();

        Self {
            lines_count: lines.len(),
            price_delta: change_order.price_delta,
            bom_additions: change_order.bom_delta.additions.len(),
            bom_removals: change_order.bom_delta.removals.len(),
            affected_entities,
            field_changes,
        }
    }
}
