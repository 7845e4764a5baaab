pub mod multitask;
