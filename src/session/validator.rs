//! Semantic checks against the transfer context.
//!
//! Each check returns the diagnostic to report on failure. They are pure:
//! the caller updates the context only after every check passed.

use super::context::TransferContext;
use crate::catalog::pi;
use crate::diagnostic::Diagnostic;
use crate::protocol::{Fpdu, RecordFormat};

pub type Check = Result<(), Diagnostic>;

/// A file-level request needs an active transfer.
pub fn require_context(ctx: Option<&TransferContext>) -> Result<&TransferContext, Diagnostic> {
    ctx.ok_or(Diagnostic::D3_311)
}

/// One article must fit the negotiated record length.
pub fn check_article(len: usize, ctx: &TransferContext) -> Check {
    if ctx.record_length > 0 && len > ctx.record_length {
        return Err(Diagnostic::D2_220);
    }
    Ok(())
}

/// A data frame's payload must fit the negotiated entity size.
pub fn check_entity_size(len: usize, ctx: &TransferContext) -> Check {
    if ctx.max_entity_size > 0 && len > ctx.max_entity_size {
        return Err(Diagnostic::D2_220);
    }
    Ok(())
}

/// Accepting `incoming` more bytes must not pass the announced size.
pub fn check_announced_size(incoming: usize, ctx: &TransferContext) -> Check {
    if ctx.announced_size > 0 && ctx.bytes() + incoming as u64 > ctx.announced_size {
        return Err(Diagnostic::D2_224);
    }
    Ok(())
}

/// Counts declared in TRANS_END must equal ours exactly.
pub fn check_counts(fpdu: &Fpdu, ctx: &TransferContext) -> Check {
    if let Some(declared) = fpdu.number(pi::BYTE_COUNT) {
        if declared != ctx.bytes() {
            return Err(Diagnostic::D3_319);
        }
    }
    if let Some(declared) = fpdu.number(pi::ARTICLE_COUNT) {
        if declared != ctx.records() {
            return Err(Diagnostic::D3_319);
        }
    }
    Ok(())
}

/// CREATE must name a file, and fixed-format requests a record length.
pub fn check_create(fpdu: &Fpdu) -> Check {
    if fpdu.text(pi::FILENAME).map_or(true, |name| name.is_empty()) {
        return Err(Diagnostic::D3_318);
    }
    let format = fpdu.flag(pi::ARTICLE_FORMAT).map(RecordFormat::from_code);
    let fixed = format == Some(RecordFormat::Fixed);
    if fixed && fpdu.number(pi::ARTICLE_LENGTH).unwrap_or(0) == 0 {
        return Err(Diagnostic::D3_318);
    }
    Ok(())
}

/// Sync point numbers strictly increase; a repeated number fails too.
pub fn check_sync(point: u32, ctx: &TransferContext) -> Check {
    if point <= ctx.current_sync() {
        return Err(Diagnostic::D3_307);
    }
    Ok(())
}

/// Requested version must not exceed the highest we speak.
pub fn check_version(requested: u64, supported: u16) -> Check {
    if requested > supported as u64 {
        return Err(Diagnostic::D3_308);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FpduKind;
    use crate::protocol::{CreateBuilder, Leaf};
    use crate::session::Direction;

    fn context() -> TransferContext {
        let mut ctx = TransferContext::new(1, "FILE", Direction::Receive);
        ctx.record_length = 1024;
        ctx.max_entity_size = 4096;
        ctx
    }

    #[test]
    fn test_article_length() {
        let mut ctx = context();
        assert_eq!(check_article(1024, &ctx), Ok(()));
        assert_eq!(check_article(2048, &ctx), Err(Diagnostic::D2_220));
        ctx.record_length = 0;
        assert_eq!(check_article(60_000, &ctx), Ok(()));
    }

    #[test]
    fn test_entity_size() {
        let ctx = context();
        assert_eq!(check_entity_size(4096, &ctx), Ok(()));
        assert_eq!(check_entity_size(4097, &ctx), Err(Diagnostic::D2_220));
    }

    #[test]
    fn test_announced_size() {
        let mut ctx = context();
        assert_eq!(check_announced_size(1 << 20, &ctx), Ok(()));
        ctx.announced_size = 100;
        ctx.record_data(&[0; 60], 1);
        assert_eq!(check_announced_size(40, &ctx), Ok(()));
        assert_eq!(check_announced_size(41, &ctx), Err(Diagnostic::D2_224));
    }

    #[test]
    fn test_count_reconciliation() {
        let mut ctx = context();
        ctx.record_data(&[0; 25], 1);
        ctx.record_data(&[0; 26], 1);
        let b = ctx.bytes();

        let end =
            |bytes: u64| Fpdu::new(FpduKind::TransEnd).with(Leaf::numeric(pi::BYTE_COUNT, bytes));
        assert_eq!(check_counts(&end(b), &ctx), Ok(()));
        assert_eq!(check_counts(&end(b + 1), &ctx), Err(Diagnostic::D3_319));
        assert_eq!(check_counts(&end(b - 1), &ctx), Err(Diagnostic::D3_319));

        let records = Fpdu::new(FpduKind::TransEnd).with(Leaf::numeric(pi::ARTICLE_COUNT, 3));
        assert_eq!(check_counts(&records, &ctx), Err(Diagnostic::D3_319));
        assert_eq!(check_counts(&Fpdu::new(FpduKind::TransEnd), &ctx), Ok(()));
    }

    #[test]
    fn test_sync_monotonic() {
        let mut ctx = context();
        for current in 0..20u32 {
            for point in 0..=current {
                assert_eq!(check_sync(point, &ctx), Err(Diagnostic::D3_307));
            }
            assert_eq!(check_sync(current + 1, &ctx), Ok(()));
            ctx.mark_sync(current + 1);
        }
    }

    #[test]
    fn test_create_requirements() {
        assert_eq!(check_create(&CreateBuilder::new("FILE").build()), Ok(()));
        assert_eq!(
            check_create(&CreateBuilder::new("FILE").fixed_records(0).build()),
            Err(Diagnostic::D3_318)
        );
        assert_eq!(
            check_create(&CreateBuilder::new("").build()),
            Err(Diagnostic::D3_318)
        );
        assert_eq!(
            check_create(&CreateBuilder::new("FILE").fixed_records(80).build()),
            Ok(())
        );
    }

    #[test]
    fn test_version() {
        assert_eq!(check_version(2, 2), Ok(()));
        assert_eq!(check_version(1, 2), Ok(()));
        assert_eq!(check_version(3, 2), Err(Diagnostic::D3_308));
    }

    #[test]
    fn test_require_context() {
        assert_eq!(require_context(None).unwrap_err(), Diagnostic::D3_311);
        let ctx = context();
        assert!(require_context(Some(&ctx)).is_ok());
    }
}
