//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **MemoryBroker**: プロセス内で完結する Pub/Sub ブローカー（テスト・デモ用）
//! - **RedisBus**: Redis pub/sub（`redis://` アドレス）。プロセスをまたいで task を呼べる

pub mod memory_bus;
pub mod redis_bus;

pub use self::memory_bus::{MemoryBroker, MemorySubscription};
pub use self::redis_bus::{RedisBus, RedisSubscription};
