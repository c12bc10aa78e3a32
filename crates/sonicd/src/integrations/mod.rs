pub mod watergate;
