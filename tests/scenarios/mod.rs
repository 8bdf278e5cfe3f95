mod basic_build;
mod find_emulator;
mod order_only_rebuild;
mod pattern_priority;
