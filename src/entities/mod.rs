pub mod category;
pub mod checkout_session;
pub mod customer;
pub mod merchant;
pub mod order;
pub mod order_event;
pub mod order_item;
pub mod payment;
pub mod payment_proof;
pub mod product;

pub use category::Entity as Category;
pub use checkout_session::Entity as CheckoutSession;
pub use customer::Entity as Customer;
pub use merchant::Entity as Merchant;
pub use order::Entity as Order;
pub use order_event::Entity as OrderEvent;
pub use order_item::Entity as OrderItem;
pub use payment::Entity as Payment;
pub use payment_proof::Entity as PaymentProof;
pub use product::Entity as Product;
