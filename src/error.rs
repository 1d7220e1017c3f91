//! error — таксономия ошибок кодека.
//!
//! - Contract: ошибка программиста (недопустимый вид значения, ссылка на
//!   структурный объект вне корня, поле отсутствует на целевом типе и т.п.).
//! - Resolution: окружение/версия (тип не загружается, путь anchored-объекта
//!   не найден). Фатально для всего restore.
//! - Malformed: запись внутренне несогласована (id, счётчики полей, токены).
//!
//! Нехватка полей/групп в старой записи ошибкой не является.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapError {
    #[error("contract violation: {0}")]
    Contract(String),

    #[error("resolution failure: {0}")]
    Resolution(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

pub type SnapResult<T> = std::result::Result<T, SnapError>;

impl SnapError {
    pub fn contract<S: Into<String>>(msg: S) -> Self {
        SnapError::Contract(msg.into())
    }

    pub fn resolution<S: Into<String>>(msg: S) -> Self {
        SnapError::Resolution(msg.into())
    }

    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        SnapError::Malformed(msg.into())
    }

    #[inline]
    pub fn is_contract(&self) -> bool {
        matches!(self, SnapError::Contract(_))
    }

    #[inline]
    pub fn is_resolution(&self) -> bool {
        matches!(self, SnapError::Resolution(_))
    }

    #[inline]
    pub fn is_malformed(&self) -> bool {
        matches!(self, SnapError::Malformed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_class_prefix() {
        let e = SnapError::resolution("type 'res://x' not found");
        assert!(e.is_resolution());
        assert_eq!(e.to_string(), "resolution failure: type 'res://x' not found");

        let e = SnapError::contract("callable");
        assert!(e.is_contract() && !e.is_malformed());
    }

    #[test]
    fn converts_into_anyhow_with_context() {
        use anyhow::Context;
        let r: SnapResult<()> = Err(SnapError::malformed("bad id"));
        let e = r.context("restore").unwrap_err();
        let root = e.downcast_ref::<SnapError>().expect("SnapError at the root");
        assert!(root.is_malformed());
    }
}
