// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The WML/WMLScript compiler collaborator: a pure function
//! invoked when a response's Content-Type is `text/vnd.wap.wml` or
//! `text/vnd.wap.wmlscript`. The bytecode compilers themselves are out of
//! scope; this module defines the seam and the content-transformation
//! error policy.

use bytes::Bytes;
use thiserror::Error;

pub const WML: &str = "text/vnd.wap.wml";
pub const WMLSCRIPT: &str = "text/vnd.wap.wmlscript";
pub const WMLC: &str = "application/vnd.wap.wmlc";
pub const WMLSCRIPTC: &str = "application/vnd.wap.wmlscriptc";

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("wml compiler rejected the document: {0}")]
    Wml(String),
    #[error("wmlscript compiler rejected the document: {0}")]
    WmlScript(String),
}

/// The compiler seam itself. A production build supplies a real WML/
/// WMLScript bytecode compiler here; this crate's core never calls the
/// compiler directly — only through [`transform_response`].
pub trait Compiler: Send + Sync {
    fn compile(&self, content: &[u8], content_type: &str, charset: Option<&str>)
        -> Result<Bytes, CompileError>;
}

/// A [`Compiler`] that never compiles anything: every call fails, so
/// [`transform_response`] always falls through to passing the original
/// markup/script through untouched. The real WML/WMLScript bytecode
/// compilers are out of scope; this is what a
/// deployment runs until one is wired in as a real `Compiler`.
pub struct PassthroughCompiler;

impl Compiler for PassthroughCompiler {
    fn compile(&self, _content: &[u8], content_type: &str, _charset: Option<&str>) -> Result<Bytes, CompileError> {
        match content_type {
            WMLSCRIPT => Err(CompileError::WmlScript("no compiler configured".to_string())),
            _ => Err(CompileError::Wml("no compiler configured".to_string())),
        }
    }
}

/// If `content_type` matches a known source type, compiles the body and
/// rewrites the Content-Type; on failure, logs and passes the original
/// body through unchanged with its original Content-Type).
pub fn transform_response(
    compiler: &dyn Compiler,
    content_type: &str,
    charset: Option<&str>,
    body: Bytes,
) -> (String, Bytes) {
    let target = match content_type {
        WML => Some(WMLC),
        WMLSCRIPT => Some(WMLSCRIPTC),
        _ => None,
    };
    let Some(target) = target else {
        return (content_type.to_string(), body);
    };
    match compiler.compile(&body, content_type, charset) {
        Ok(compiled) => (target.to_string(), compiled),
        Err(err) => {
            tracing::warn!(%err, content_type, "content transformation failed, passing body through");
            (content_type.to_string(), body)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;
    impl Compiler for AlwaysFails {
        fn compile(&self, _: &[u8], _: &str, _: Option<&str>) -> Result<Bytes, CompileError> {
            Err(CompileError::Wml("bad markup".to_string()))
        }
    }

    struct Uppercases;
    impl Compiler for Uppercases {
        fn compile(&self, content: &[u8], _: &str, _: Option<&str>) -> Result<Bytes, CompileError> {
            Ok(Bytes::from(content.to_ascii_uppercase()))
        }
    }

    #[test]
    fn non_wap_content_type_passes_through_untouched() {
        let (ct, body) =
            transform_response(&Uppercases, "text/html", None, Bytes::from_static(b"<p>hi</p>"));
        assert_eq!(ct, "text/html");
        assert_eq!(&body[..], b"<p>hi</p>");
    }

    #[test]
    fn wml_success_rewrites_content_type() {
        let (ct, body) = transform_response(&Uppercases, WML, None, Bytes::from_static(b"deck"));
        assert_eq!(ct, WMLC);
        assert_eq!(&body[..], b"DECK");
    }

    #[test]
    fn compiler_failure_preserves_original_body_and_type() {
        let (ct, body) = transform_response(&AlwaysFails, WML, None, Bytes::from_static(b"deck"));
        assert_eq!(ct, WML);
        assert_eq!(&body[..], b"deck");
    }
}
