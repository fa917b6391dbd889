use crate::schema::{Column, Database, Schema, Table};

pub const SHOP_DATABASE: &str = "shop";

pub const AUDIT_DATABASE: &str = "audit";

pub const CONTROL_DATABASE: &str = "maxwell";

/// A catalog with a `shop` database holding `orders` and `customers`, an `audit` database
/// holding `log`, and the control database tables.
pub fn shop_schema() -> Schema {
    let mut shop = Database::new(SHOP_DATABASE);
    shop.tables = vec![orders_table(), customers_table()];

    let mut audit = Database::new(AUDIT_DATABASE);
    audit.tables = vec![
        Table::new(
            AUDIT_DATABASE,
            "log",
            vec![
                Column::new("id", "bigint").not_null(),
                Column::new("message", "text"),
            ],
        )
        .with_primary_key(vec!["id".to_string()]),
    ];

    Schema::new(vec![shop, audit, control_database()])
}

/// `shop.orders(id, status, amount)`.
pub fn orders_table() -> Table {
    Table::new(
        SHOP_DATABASE,
        "orders",
        vec![
            Column::new("id", "bigint").not_null(),
            Column::new("status", "varchar"),
            Column::new("amount", "decimal"),
        ],
    )
    .with_primary_key(vec!["id".to_string()])
}

/// `shop.customers(id, name)`.
pub fn customers_table() -> Table {
    Table::new(
        SHOP_DATABASE,
        "customers",
        vec![
            Column::new("id", "bigint").not_null(),
            Column::new("name", "varchar"),
        ],
    )
    .with_primary_key(vec!["id".to_string()])
}

/// The control database with its `heartbeats` and `bootstrap` tables.
pub fn control_database() -> Database {
    let mut control = Database::new(CONTROL_DATABASE);
    control.tables = vec![
        Table::new(
            CONTROL_DATABASE,
            "heartbeats",
            vec![
                Column::new("server_id", "int").not_null(),
                Column::new("client_id", "varchar").not_null(),
                Column::new("heartbeat", "bigint").not_null(),
            ],
        )
        .with_primary_key(vec!["server_id".to_string(), "client_id".to_string()]),
        Table::new(
            CONTROL_DATABASE,
            "bootstrap",
            vec![
                Column::new("id", "bigint").not_null(),
                Column::new("database_name", "varchar").not_null(),
                Column::new("table_name", "varchar").not_null(),
                Column::new("client_id", "varchar").not_null(),
                Column::new("started_at", "datetime"),
                Column::new("completed_at", "datetime"),
                Column::new("is_complete", "tinyint"),
            ],
        )
        .with_primary_key(vec!["id".to_string()]),
    ];

    control
}
