pub mod container;
pub mod view;

pub use container::Container;
pub use view::ViewState;
