//! Ports - 抽象化レイヤー
//!
//! Pub/Sub transport へのインターフェース。接続そのもの（アドレス、認証）は
//! コアの外側で確立され、ここで定義する trait を通じて渡される。
//!
//! - `Publisher`: メッセージの publish
//! - `Subscriber`: パターン購読の発行
//! - `Subscription`: 購読からのメッセージ受信
//! - `Connection`: 上記 2 つのハンドル + readiness フラグ

pub mod bus;

pub use self::bus::{Connection, Message, Publisher, ReadyFlag, Subscriber, Subscription};
