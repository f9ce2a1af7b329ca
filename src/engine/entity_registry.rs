// ==========================================
// 定制橱柜车间 ERP - 变更目标实体注册表
// ==========================================
// 职责: 行项目 (entity_type, field_name) → 可读写的表/列
// 红线: 封闭注册表, 只有此处列出的实体与字段可被变更单写入
// 解析顺序: 直接类型名 → 别名表; 都不命中返回 None (调用方告警跳过)
// ==========================================

/// 实体描述
#[derive(Debug, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub tag: &'static str,
    pub table: &'static str,
    pub key_column: &'static str,
    pub fields: &'static [&'static str],
    /// 数值列 (REAL / INTEGER), 写入前按 SQLite 读回的形式规范化
    pub numeric_fields: &'static [&'static str],
}

/// 已解析的可写字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub entity: &'static EntityDescriptor,
    pub column: &'static str,
}

impl FieldRef {
    pub fn table(&self) -> &'static str {
        self.entity.table
    }

    pub fn key_column(&self) -> &'static str {
        self.entity.key_column
    }

    pub fn is_numeric(&self) -> bool {
        self.entity.numeric_fields.contains(&self.column)
    }

    /// 规范化待写入的值
    ///
    /// 数值列: "36.50" → "36.5", "0036" → "36", 与读回结果一致; 非数字原样保留
    pub fn normalize(&self, value: &str) -> String {
        if !self.is_numeric() {
            return value.to_string();
        }
        let trimmed = value.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return i.to_string();
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => f.to_string(),
            _ => value.to_string(),
        }
    }
}

static ENTITIES: [EntityDescriptor; 4] = [
    EntityDescriptor {
        tag: "Project",
        table: "project",
        key_column: "project_id",
        fields: &["name", "stage_key", "delivery_date"],
        numeric_fields: &[],
    },
    EntityDescriptor {
        tag: "Task",
        table: "task",
        key_column: "task_id",
        fields: &["title", "description", "allocated_hours"],
        numeric_fields: &["allocated_hours"],
    },
    EntityDescriptor {
        tag: "Cabinet",
        table: "cabinet",
        key_column: "cabinet_id",
        fields: &[
            "name",
            "width_in",
            "height_in",
            "depth_in",
            "quantity",
            "finish",
            "unit_price",
        ],
        numeric_fields: &["width_in", "height_in", "depth_in", "quantity"],
    },
    EntityDescriptor {
        tag: "CabinetMaterialsBom",
        table: "cabinet_materials_bom",
        key_column: "bom_line_id",
        fields: &["component_name", "quantity_required", "unit_of_measure", "unit_cost"],
        numeric_fields: &["quantity_required"],
    },
];

/// 历史短名 → 实体类型名
const ALIASES: &[(&str, &str)] = &[("BomLine", "CabinetMaterialsBom")];

pub struct EntityRegistry;

impl EntityRegistry {
    /// 解析实体类型
    pub fn resolve(tag: &str) -> Option<&'static EntityDescriptor> {
        let tag = tag.trim();
        if let Some(found) = ENTITIES.iter().find(|e| e.tag == tag) {
            return Some(found);
        }

        ALIASES
            .iter()
            .find(|(alias, _)| *alias == tag)
            .and_then(|(_, target)| ENTITIES.iter().find(|e| e.tag == *target))
    }

    /// 解析实体字段
    pub fn resolve_field(tag: &str, field_name: &str) -> Option<FieldRef> {
        let entity = Self::resolve(tag)?;
        let field_name = field_name.trim();
        entity
            .fields
            .iter()
            .find(|f| **f == field_name)
            .map(|column| FieldRef { entity, column })
    }

    /// 全部已注册类型名
    pub fn tags() -> impl Iterator<Item = &'static str> {
        ENTITIES.iter().map(|e| e.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_and_alias_resolution() {
        assert_eq!(EntityRegistry::resolve("Cabinet").unwrap().table, "cabinet");
        assert_eq!(EntityRegistry::resolve("BomLine").unwrap().tag, "CabinetMaterialsBom");
        assert_eq!(
            EntityRegistry::resolve("CabinetMaterialsBom").unwrap().key_column,
            "bom_line_id"
        );
        assert!(EntityRegistry::resolve("Door").is_none());
    }

    #[test]
    fn test_field_whitelist() {
        let field = EntityRegistry::resolve_field("Cabinet", "width_in").unwrap();
        assert_eq!(field.table(), "cabinet");
        assert_eq!(field.key_column(), "cabinet_id");
        assert_eq!(field.column, "width_in");

        // 未登记字段不可写
        assert!(EntityRegistry::resolve_field("Cabinet", "project_id").is_none());
        assert!(EntityRegistry::resolve_field("Task", "state").is_none());
        assert!(EntityRegistry::resolve_field("Unknown", "name").is_none());
    }

    #[test]
    fn test_numeric_values_normalized() {
        let width = EntityRegistry::resolve_field("Cabinet", "width_in").unwrap();
        assert!(width.is_numeric());
        assert_eq!(width.normalize("36.50"), "36.5");
        assert_eq!(width.normalize(" 0036 "), "36");
        assert_eq!(width.normalize("36.0"), "36");
        assert_eq!(width.normalize("wide"), "wide");

        // 文本列 (含金额字符串) 不做处理
        let price = EntityRegistry::resolve_field("Cabinet", "unit_price").unwrap();
        assert!(!price.is_numeric());
        assert_eq!(price.normalize("125.50"), "125.50");
    }

    #[test]
    fn test_tags_listing() {
        let tags: Vec<_> = EntityRegistry::tags().collect();
        assert_eq!(tags, vec!["Project", "Task", "Cabinet", "CabinetMaterialsBom"]);
    }
}
