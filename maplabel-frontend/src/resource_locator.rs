use std::env;
use std::iter;
use std::path::{Path, PathBuf};

use maplabel_config::AppConfig;
use maplabel_io::with_map_extension;
use tracing::{debug, trace};

const MAP_ROOTS_ENV: &str = "MAPLABEL_MAP_ROOTS";

/// 按优先级排列的地图搜索目录。
#[derive(Debug, Clone, Default)]
pub struct MapLocator {
    roots: Vec<PathBuf>,
}

impl MapLocator {
    /// 配置中的目录在前，`MAPLABEL_MAP_ROOTS` 中的目录在后；不存在的目录忽略。
    pub fn from_config(config: &AppConfig) -> Self {
        let mut locator = Self::default();
        for root in &config.resources.map_roots {
            locator.add_root(root.clone());
        }
        if let Some(paths) = env::var_os(MAP_ROOTS_ENV) {
            for root in env::split_paths(&paths) {
                locator.add_root(root);
            }
        }
        locator
    }

    /// 把目录提到最前。
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.roots.retain(|root| root != &dir);
        self.roots.insert(0, dir);
        self
    }

    fn add_root(&mut self, root: PathBuf) {
        if root.is_dir() && !self.roots.contains(&root) {
            self.roots.push(root);
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// 绝对路径只试自身；相对路径先试当前目录，再依次拼上搜索目录。
    fn candidates<'a>(&'a self, file: &'a Path) -> impl Iterator<Item = PathBuf> + 'a {
        let rooted = (!file.is_absolute())
            .then(|| self.roots.iter().map(move |root| root.join(file)));
        iter::once(file.to_path_buf()).chain(rooted.into_iter().flatten())
    }

    /// 解析地图路径，没有扩展名时补上 `.bin`。
    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        let file = with_map_extension(path);
        let found = self
            .candidates(&file)
            .inspect(|candidate| trace!(candidate = %candidate.display(), "尝试地图路径"))
            .find(|candidate| candidate.is_file());
        match found {
            Some(path) => Some(path.canonicalize().unwrap_or(path)),
            None => {
                debug!(path = %file.display(), roots = self.roots.len(), "未找到地图文件");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_names_against_roots() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("city.bin"), b"").unwrap();

        let mut config = AppConfig::default();
        config.resources.map_roots = vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
            first.path().to_path_buf(),
            PathBuf::from("/definitely/not/here"),
        ];
        let locator = MapLocator::from_config(&config);
        assert!(locator.roots().len() >= 2);
        assert_eq!(locator.roots()[0], first.path());
        assert_eq!(locator.roots()[1], second.path());

        let found = locator.resolve(Path::new("city")).unwrap();
        assert_eq!(found.file_name().unwrap(), "city.bin");
        assert!(locator.resolve(Path::new("village.bin")).is_none());
    }

    #[test]
    fn base_directory_has_priority() {
        let base = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        std::fs::write(base.path().join("a.bin"), b"base").unwrap();
        std::fs::write(other.path().join("a.bin"), b"other").unwrap();
        let mut config = AppConfig::default();
        config.resources.map_roots = vec![other.path().to_path_buf(), base.path().to_path_buf()];
        let locator = MapLocator::from_config(&config).with_base_dir(base.path());
        assert_eq!(locator.roots()[0], base.path());
        assert_eq!(locator.roots().len(), 2);
        let found = locator.resolve(Path::new("a.bin")).unwrap();
        assert_eq!(std::fs::read(found).unwrap(), b"base");
    }

    #[test]
    fn absolute_paths_skip_the_roots() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("town.bin"), b"").unwrap();
        let locator = MapLocator::default().with_base_dir(root.path());
        let missing = root.path().join("elsewhere").join("town");
        assert!(locator.resolve(&missing).is_none());
        assert!(locator.resolve(&root.path().join("town")).is_some());
    }
}
