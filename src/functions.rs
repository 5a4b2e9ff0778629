//! Template functions bound to a render.
//!
//! Every render gets its own Tera clone with these functions registered
//! against the current [`BuildContext`] and the content whose body or page
//! is being evaluated (references resolve relative to it).
//!
//! | Function | Returns |
//! |----------|---------|
//! | `link_to(target, text?, fragment?, abs?, group?, page?)` | `<a href>` element |
//! | `path_to(target, fragment?, abs?, group?, page?)` | link path |
//! | `url_of(target, fragment?, group?, page?)` | absolute URL |
//! | `get_content(target)` | content view |
//! | `get_contents(filters?, excludes?, subdirs?, recurse?)` | content views, newest first |
//! | `group_contents(group, filters?, excludes?, subdirs?, recurse?)` | `[{value, contents}]` |
//! | `html_of(target?)`, `abstract_of(target?, length?)`, `headers_of(target?)` | rendered body parts |
//! | `config(key, default?)` | config value at the content's directory |
//! | `now()`, `get_env(name, default?)` | clock and environment |
//!
//! `target` is a reference string or a content view with a `reference`
//! field; where optional it defaults to the content being rendered. A
//! function that fails stashes its typed error on the context so the build
//! reports it instead of Tera's wrapper.

use maud::html;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tera::Tera;

use crate::content::Content;
use crate::context::{self, BuildContext, RenderError};
use crate::store::Query;
use crate::types::{ContentPath, PageArgs};

type Args = HashMap<String, Value>;
type Handler = fn(&Bound, &Args) -> Result<Value, RenderError>;

struct Bound {
    ctx: BuildContext,
    base: ContentPath,
}

const FUNCTIONS: &[(&str, Handler)] = &[
    ("link_to", link_to),
    ("path_to", path_to),
    ("url_of", url_of),
    ("get_content", get_content),
    ("get_contents", get_contents),
    ("group_contents", group_contents),
    ("html_of", html_of),
    ("abstract_of", abstract_of),
    ("headers_of", headers_of),
    ("config", config),
    ("now", now),
    ("get_env", get_env),
];

/// Register every function on `tera`, resolving references against `base`.
pub fn register(tera: &mut Tera, ctx: &BuildContext, base: &ContentPath) {
    let bound = Arc::new(Bound {
        ctx: ctx.clone(),
        base: base.clone(),
    });
    for &(name, handler) in FUNCTIONS {
        let bound = bound.clone();
        tera.register_function(
            name,
            move |args: &HashMap<String, tera::Value>| -> tera::Result<tera::Value> {
                handler(&bound, args).map_err(|err| {
                    let message = err.to_string();
                    bound.ctx.stash_error(err);
                    tera::Error::msg(message)
                })
            },
        );
    }
}

// =========================================================================
// Argument helpers
// =========================================================================

fn str_arg(args: &Args, name: &str) -> Option<String> {
    match args.get(name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn bool_arg(args: &Args, name: &str) -> bool {
    args.get(name).is_some_and(crate::metadata::is_truthy)
}

fn usize_arg(function: &'static str, args: &Args, name: &str) -> Result<Option<usize>, RenderError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| RenderError::argument(function, format!("{} must be a non-negative integer", name))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RenderError::argument(function, format!("{} must be an integer, got {:?}", name, s))),
        Some(other) => Err(RenderError::argument(
            function,
            format!("{} must be an integer, got {}", name, other),
        )),
    }
}

fn target<'a>(bound: &'a Bound, function: &'static str, args: &Args) -> Result<&'a Content, RenderError> {
    let reference = match args.get("target") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => match map.get("reference") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(RenderError::argument(function, "target has no reference")),
        },
        Some(other) => {
            return Err(RenderError::argument(
                function,
                format!("target must be a reference, got {}", other),
            ));
        }
        None => return Err(RenderError::argument(function, "missing target")),
    };
    bound.ctx.resolve(&reference, &bound.base)
}

fn target_or_self<'a>(bound: &'a Bound, function: &'static str, args: &Args) -> Result<&'a Content, RenderError> {
    if args.contains_key("target") {
        return target(bound, function, args);
    }
    Ok(bound.ctx.site().store.get_path(&bound.base)?)
}

fn page_args(function: &'static str, args: &Args) -> Result<PageArgs, RenderError> {
    let cur_page = usize_arg(function, args, "page")?.unwrap_or(1).max(1);
    Ok(PageArgs {
        cur_page,
        group_value: str_arg(args, "group"),
        ..PageArgs::default()
    })
}

fn query(args: &Args) -> Query {
    let recurse = args.get("recurse").is_none_or(crate::metadata::is_truthy);
    Query::from_values(
        args.get("filters"),
        args.get("excludes"),
        args.get("subdirs"),
        recurse,
    )
}

// =========================================================================
// Links
// =========================================================================

fn link_to(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let content = target(bound, "link_to", args)?;
    let page = page_args("link_to", args)?;
    let fragment = str_arg(args, "fragment");
    let href = bound
        .ctx
        .path_to_page(content, &page, fragment.as_deref(), bool_arg(args, "abs"))?;
    let text = match str_arg(args, "text") {
        Some(text) => text,
        None => bound.ctx.title(content)?,
    };
    Ok(Value::String(html! { a href=(href) { (text) } }.into_string()))
}

fn path_to(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let content = target(bound, "path_to", args)?;
    let page = page_args("path_to", args)?;
    let fragment = str_arg(args, "fragment");
    let path = bound
        .ctx
        .path_to_page(content, &page, fragment.as_deref(), bool_arg(args, "abs"))?;
    Ok(Value::String(path))
}

fn url_of(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let content = target(bound, "url_of", args)?;
    let page = page_args("url_of", args)?;
    let mut url = bound.ctx.url(content, &page)?;
    if let Some(fragment) = str_arg(args, "fragment").filter(|f| !f.is_empty()) {
        url.push('#');
        url.push_str(&bound.ctx.resolve_fragment(content, &fragment)?);
    }
    Ok(Value::String(url))
}

// =========================================================================
// Contents
// =========================================================================

fn get_content(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let content = target(bound, "get_content", args)?;
    bound.ctx.proxy(content)
}

fn get_contents(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let ctx = &bound.ctx;
    let contents = ctx.site().store.get_many(ctx.config(), &query(args))?;
    let proxies = contents
        .into_iter()
        .map(|c| ctx.proxy(c))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(proxies))
}

fn group_contents(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let ctx = &bound.ctx;
    let key = str_arg(args, "group").ok_or_else(|| RenderError::argument("group_contents", "missing group"))?;
    let groups = ctx.site().store.group_by(ctx.config(), &key, &query(args))?;
    let mut out = Vec::with_capacity(groups.len());
    for (value, members) in groups {
        let contents = members
            .into_iter()
            .map(|c| ctx.proxy(c))
            .collect::<Result<Vec<_>, _>>()?;
        out.push(json!({ "value": value, "contents": contents }));
    }
    Ok(Value::Array(out))
}

fn html_of(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let content = target_or_self(bound, "html_of", args)?;
    Ok(Value::String(bound.ctx.get_html(content)?.html.clone()))
}

fn abstract_of(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let content = target_or_self(bound, "abstract_of", args)?;
    let length = usize_arg("abstract_of", args, "length")?;
    Ok(Value::String(bound.ctx.get_abstract(content, length)?))
}

fn headers_of(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let content = target_or_self(bound, "headers_of", args)?;
    Ok(json!(bound.ctx.get_headers(content)?))
}

// =========================================================================
// Environment
// =========================================================================

fn config(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let key = str_arg(args, "key").ok_or_else(|| RenderError::argument("config", "missing key"))?;
    match bound.ctx.config().get_opt(&bound.base.dir, &key)? {
        Some(value) => Ok(value),
        None => match args.get("default") {
            Some(default) => Ok(default.clone()),
            None => Err(crate::config::ConfigError::NotFound {
                key,
                dir: bound.base.dir.join("/"),
            }
            .into()),
        },
    }
}

fn now(bound: &Bound, _args: &Args) -> Result<Value, RenderError> {
    bound.ctx.mark_always_rebuild();
    Ok(Value::String(context::now_rfc3339()))
}

fn get_env(bound: &Bound, args: &Args) -> Result<Value, RenderError> {
    let name = str_arg(args, "name").ok_or_else(|| RenderError::argument("get_env", "missing name"))?;
    bound.ctx.mark_always_rebuild();
    match std::env::var(&name) {
        Ok(value) => Ok(Value::String(value)),
        Err(_) => Ok(args.get("default").cloned().unwrap_or(Value::Null)),
    }
}
