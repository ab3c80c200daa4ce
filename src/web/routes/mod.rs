pub mod query_routes;
pub mod tag_routes;
pub mod tagged_item_routes;
pub mod warehouse_routes;
