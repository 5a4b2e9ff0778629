//! Hook points around loading and building.
//!
//! Hooks are plain closures registered on a [`HookRegistry`] that the
//! [`Site`](crate::site::Site) owns; nothing is registered globally, so two
//! sites in one process (or two tests) never see each other's hooks.
//! Every list runs in registration order.
//!
//! | Point | Called with | May change |
//! |-------|-------------|------------|
//! | `pre_load` | source file path | nothing |
//! | `post_load` | `&mut ContentSource` | metadata |
//! | `pre_build` | content, page args | nothing |
//! | `post_build` | content, written path, bytes | the bytes written |

use std::path::Path;

use crate::content::Content;
use crate::types::{ContentSource, PageArgs};

type PreLoad = Box<dyn Fn(&Path) + Send + Sync>;
type PostLoad = Box<dyn Fn(&mut ContentSource) + Send + Sync>;
type PreBuild = Box<dyn Fn(&Content, &PageArgs) + Send + Sync>;
type PostBuild = Box<dyn Fn(&Content, &Path, Vec<u8>) -> Vec<u8> + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    pre_load: Vec<PreLoad>,
    post_load: Vec<PostLoad>,
    pre_build: Vec<PreBuild>,
    post_build: Vec<PostBuild>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("pre_load", &self.pre_load.len())
            .field("post_load", &self.post_load.len())
            .field("pre_build", &self.pre_build.len())
            .field("post_build", &self.post_build.len())
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_pre_load(&mut self, hook: impl Fn(&Path) + Send + Sync + 'static) {
        self.pre_load.push(Box::new(hook));
    }

    pub fn on_post_load(&mut self, hook: impl Fn(&mut ContentSource) + Send + Sync + 'static) {
        self.post_load.push(Box::new(hook));
    }

    pub fn on_pre_build(&mut self, hook: impl Fn(&Content, &PageArgs) + Send + Sync + 'static) {
        self.pre_build.push(Box::new(hook));
    }

    pub fn on_post_build(
        &mut self,
        hook: impl Fn(&Content, &Path, Vec<u8>) -> Vec<u8> + Send + Sync + 'static,
    ) {
        self.post_build.push(Box::new(hook));
    }

    pub fn pre_load(&self, path: &Path) {
        for hook in &self.pre_load {
            hook(path);
        }
    }

    pub fn post_load(&self, source: &mut ContentSource) {
        for hook in &self.post_load {
            hook(source);
        }
    }

    pub fn pre_build(&self, content: &Content, args: &PageArgs) {
        for hook in &self.pre_build {
            hook(content, args);
        }
    }

    /// Thread `bytes` through every post-build hook.
    pub fn post_build(&self, content: &Content, path: &Path, bytes: Vec<u8>) -> Vec<u8> {
        self.post_build
            .iter()
            .fold(bytes, |bytes, hook| hook(content, path, bytes))
    }

    pub fn has_post_build(&self) -> bool {
        !self.post_build.is_empty()
    }
}
