pub mod description;
pub mod machine_factory;
pub mod transition_logger;
