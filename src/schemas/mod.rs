pub mod checking;
