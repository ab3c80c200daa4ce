//! SeaORM entities for the catalog tables.

pub mod search_history;
pub mod tag;
pub mod tagged_item;

pub mod prelude {
    pub use super::tag::Entity as Tag;
    pub use super::tag::Model as TagModel;
    pub use super::tag::ActiveModel as TagActiveModel;
    pub use super::tag::Column as TagColumn;

    pub use super::tagged_item::Entity as TaggedItem;
    pub use super::tagged_item::Model as TaggedItemModel;
    pub use super::tagged_item::ActiveModel as TaggedItemActiveModel;
    pub use super::tagged_item::Column as TaggedItemColumn;

    pub use super::search_history::Entity as SearchHistory;
    pub use super::search_history::Model as SearchHistoryModel;
    pub use super::search_history::ActiveModel as SearchHistoryActiveModel;
    pub use super::search_history::Column as SearchHistoryColumn;
}
