use crate::scene::{Instance, PointLight, SpotLight};

/// Records whose GPU copy has to follow CPU-side changes every frame.
pub trait Animated {
    fn is_animated(&self) -> bool;
}

impl Animated for Instance {
    fn is_animated(&self) -> bool {
        Instance::is_animated(self)
    }
}

impl Animated for PointLight {
    fn is_animated(&self) -> bool {
        self.animated != 0
    }
}

impl Animated for SpotLight {
    fn is_animated(&self) -> bool {
        self.animated != 0
    }
}

/// Which records of one array need to be copied again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtySet {
    /// Every record, used on the first write of a buffer.
    All { len: usize },
    /// Ascending indices of the animated records.
    Indices(Vec<usize>),
}

impl DirtySet {
    pub fn all<T>(records: &[T]) -> Self {
        DirtySet::All { len: records.len() }
    }

    pub fn animated<T: Animated>(records: &[T]) -> Self {
        DirtySet::Indices(
            records
                .iter()
                .enumerate()
                .filter(|(_, record)| record.is_animated())
                .map(|(index, _)| index)
                .collect(),
        )
    }

    /// All records when forced, otherwise only the animated ones.
    pub fn collect<T: Animated>(records: &[T], force_all: bool) -> Self {
        if force_all {
            Self::all(records)
        } else {
            Self::animated(records)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DirtySet::All { len } => *len,
            DirtySet::Indices(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        match self {
            DirtySet::All { len } => Box::new(0..*len),
            DirtySet::Indices(indices) => Box::new(indices.iter().copied()),
        }
    }
}

#[cfg(test)]
mod tests {
    use ultraviolet::{Mat4, Vec3};

    use super::*;

    #[test]
    fn only_animated_records_are_dirty() {
        let instances = vec![
            Instance::new(0, Mat4::identity()),
            Instance::new(0, Mat4::identity()).with_animated(true),
            Instance::new(1, Mat4::identity()),
            Instance::new(1, Mat4::identity()).with_animated(true),
        ];
        let dirty = DirtySet::animated(&instances);
        assert_eq!(dirty, DirtySet::Indices(vec![1, 3]));
        assert_eq!(dirty.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn forcing_marks_everything() {
        let lights = vec![PointLight::new(Vec3::zero(), Vec3::one(), 1.0, 1.0); 3];
        assert!(DirtySet::collect(&lights, false).is_empty());
        let all = DirtySet::collect(&lights, true);
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn lights_share_the_same_rules() {
        let spots = vec![
            SpotLight::new(Vec3::zero(), Vec3::unit_y(), Vec3::one(), 1.0, 0.2, 0.4)
                .with_animated(true),
        ];
        assert_eq!(DirtySet::animated(&spots).len(), 1);
    }
}
