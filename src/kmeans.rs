//! K-means clustering, and the segmental k-means estimator that uses it to build an initial HMM.
//!
//! Seeding is a deterministic farthest-first traversal that starts at the first observation, so
//! the same data always yields the same clusters.
use crate::error::{invalid, Error, Result};
use crate::hmm::Hmm;
use crate::ihmm::InputObservation;
use crate::ndarray_utils::{Array1FloatMut, Array2FloatMut, ArrayFloat};
use crate::opdf::{Opdf, OpdfFactory};
use ndarray::prelude::*;
use tracing::debug;

const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Observations that can be grouped by k-means
pub trait Clusterable {
    type Centroid: Clone;

    fn to_centroid(&self) -> Self::Centroid;

    fn distance(&self, centroid: &Self::Centroid) -> f64;

    /// The mean of `members`, which is never empty.
    fn centroid(members: &[&Self]) -> Self::Centroid;
}

impl Clusterable for usize {
    type Centroid = f64;

    fn to_centroid(&self) -> f64 {
        *self as f64
    }

    fn distance(&self, centroid: &f64) -> f64 {
        (*self as f64 - centroid).abs()
    }

    fn centroid(members: &[&Self]) -> f64 {
        members.iter().map(|&&m| m as f64).sum::<f64>() / members.len() as f64
    }
}

impl Clusterable for f64 {
    type Centroid = f64;

    fn to_centroid(&self) -> f64 {
        *self
    }

    fn distance(&self, centroid: &f64) -> f64 {
        (self - centroid).abs()
    }

    fn centroid(members: &[&Self]) -> f64 {
        members.iter().copied().sum::<f64>() / members.len() as f64
    }
}

impl Clusterable for Array1<f64> {
    type Centroid = Array1<f64>;

    fn to_centroid(&self) -> Array1<f64> {
        self.clone()
    }

    /// Euclidean distance
    fn distance(&self, centroid: &Array1<f64>) -> f64 {
        self.l2_distance(centroid)
    }

    fn centroid(members: &[&Self]) -> Array1<f64> {
        let mut sum = Array1::zeros(members[0].len());
        for &member in members {
            sum += member;
        }
        sum / members.len() as f64
    }
}

/// Input observations are clustered by their values alone.
impl<O: Clusterable> Clusterable for InputObservation<O> {
    type Centroid = O::Centroid;

    fn to_centroid(&self) -> O::Centroid {
        self.value.to_centroid()
    }

    fn distance(&self, centroid: &O::Centroid) -> f64 {
        self.value.distance(centroid)
    }

    fn centroid(members: &[&Self]) -> O::Centroid {
        let values: Vec<&O> = members.iter().map(|m| &m.value).collect();
        O::centroid(&values)
    }
}

/// The result of clustering a set of observations into exactly `n_clusters` non-empty clusters
pub struct KMeans<'a, O: Clusterable> {
    observations: Vec<&'a O>,
    centroids: Vec<O::Centroid>,
    labels: Vec<usize>,
    iterations: usize,
    converged: bool,
}

impl<'a, O: Clusterable> KMeans<'a, O> {
    /// Cluster `observations`, running at most 100 Lloyd iterations.
    ///
    /// Fails with:
    /// - `InvalidConstruction` if `n_clusters` is 0
    /// - `EmptySequence` if there are no observations
    /// - `DegenerateClustering` if there are fewer distinct observations than clusters
    pub fn new(n_clusters: usize, observations: &'a [O]) -> Result<Self> {
        Self::with_max_iterations(n_clusters, observations, DEFAULT_MAX_ITERATIONS)
    }

    pub fn with_max_iterations(
        n_clusters: usize,
        observations: &'a [O],
        max_iterations: usize,
    ) -> Result<Self> {
        Self::from_refs(n_clusters, observations.iter().collect(), max_iterations)
    }

    pub(crate) fn from_refs(
        n_clusters: usize,
        observations: Vec<&'a O>,
        max_iterations: usize,
    ) -> Result<Self> {
        if n_clusters == 0 {
            return invalid("the number of clusters must be strictly positive");
        }
        if observations.is_empty() {
            return Err(Error::EmptySequence);
        }

        let mut centroids = seed(n_clusters, &observations)?;
        let mut labels = assign(&observations, &centroids);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < max_iterations {
            iterations += 1;
            let repaired = repair_empty_clusters(&observations, &centroids, &mut labels);
            centroids = update_centroids(&observations, &labels, n_clusters);
            let next_labels = assign(&observations, &centroids);
            let changed = repaired || next_labels != labels;
            labels = next_labels;
            if !changed {
                converged = true;
                break;
            }
        }
        // The last assignment may have emptied a cluster again
        if repair_empty_clusters(&observations, &centroids, &mut labels) {
            centroids = update_centroids(&observations, &labels, n_clusters);
        }

        debug!(n_clusters, iterations, converged, "k-means finished");
        Ok(Self {
            observations,
            centroids,
            labels,
            iterations,
            converged,
        })
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.len()
    }

    /// The members of cluster `i`, in input order
    pub fn cluster(&self, i: usize) -> Vec<&'a O> {
        self.observations
            .iter()
            .zip(&self.labels)
            .filter(|(_, label)| **label == i)
            .map(|(&o, _)| o)
            .collect()
    }

    pub fn centroid(&self, i: usize) -> &O::Centroid {
        &self.centroids[i]
    }

    /// The cluster of each observation, in input order
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// The number of Lloyd iterations performed
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// `false` if the iteration cap was reached before the assignments stabilized
    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// Farthest-first traversal from the first observation
fn seed<O: Clusterable>(n_clusters: usize, observations: &[&O]) -> Result<Vec<O::Centroid>> {
    let mut centroids = vec![observations[0].to_centroid()];
    let mut nearest: Vec<f64> = observations
        .iter()
        .map(|o| o.distance(&centroids[0]))
        .collect();

    while centroids.len() < n_clusters {
        let (farthest, distance) = nearest
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0.0), |best, (i, d)| if d > best.1 { (i, d) } else { best });
        if distance <= 0.0 {
            return Err(Error::DegenerateClustering {
                requested: n_clusters,
                distinct: centroids.len(),
            });
        }
        let centroid = observations[farthest].to_centroid();
        for (d, o) in nearest.iter_mut().zip(observations) {
            *d = d.min(o.distance(&centroid));
        }
        centroids.push(centroid);
    }

    Ok(centroids)
}

/// The nearest centroid of every observation, preferring the lowest index on ties
fn assign<O: Clusterable>(observations: &[&O], centroids: &[O::Centroid]) -> Vec<usize> {
    observations
        .iter()
        .map(|o| {
            let mut best = (0, f64::INFINITY);
            for (i, centroid) in centroids.iter().enumerate() {
                let d = o.distance(centroid);
                if d < best.1 {
                    best = (i, d);
                }
            }
            best.0
        })
        .collect()
}

fn cluster_sizes(labels: &[usize], n_clusters: usize) -> Vec<usize> {
    let mut sizes = vec![0; n_clusters];
    for &label in labels {
        sizes[label] += 1;
    }
    sizes
}

/// Move the farthest member of a multi-member cluster into each empty cluster.
///
/// Returns whether any label changed.
fn repair_empty_clusters<O: Clusterable>(
    observations: &[&O],
    centroids: &[O::Centroid],
    labels: &mut [usize],
) -> bool {
    let mut sizes = cluster_sizes(labels, centroids.len());
    let mut repaired = false;
    while let Some(empty) = sizes.iter().position(|&size| size == 0) {
        let donor = observations
            .iter()
            .enumerate()
            .filter(|&(i, _)| sizes[labels[i]] > 1)
            .map(|(i, o)| (i, o.distance(&centroids[labels[i]])))
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, best_d)) if best_d >= d => best,
                _ => Some((i, d)),
            });
        // Unreachable while there are at least as many observations as clusters
        let donor = match donor {
            Some((i, _)) => i,
            None => break,
        };
        sizes[labels[donor]] -= 1;
        sizes[empty] += 1;
        labels[donor] = empty;
        repaired = true;
    }
    repaired
}

fn update_centroids<O: Clusterable>(
    observations: &[&O],
    labels: &[usize],
    n_clusters: usize,
) -> Vec<O::Centroid> {
    let mut members: Vec<Vec<&O>> = vec![Vec::new(); n_clusters];
    for (&o, &label) in observations.iter().zip(labels) {
        members[label].push(o);
    }
    members.iter().map(|m| O::centroid(m)).collect()
}

/// Segmental k-means: estimates an HMM from hard state assignments.
///
/// The assignments start as a k-means clustering of every observation and are then refined by
/// replacing them with the Viterbi path of each sequence under the current estimate.
pub struct KMeansLearner<'a, D: Opdf> {
    sequences: Vec<&'a [D::Observation]>,
    labels: Vec<Vec<usize>>,
    opdfs: Vec<D>,
}

impl<'a, D> KMeansLearner<'a, D>
where
    D: Opdf,
    D::Observation: Clusterable,
{
    pub fn new<F, S>(n_states: usize, factory: &F, sequences: &'a [S]) -> Result<Self>
    where
        F: OpdfFactory<D>,
        S: AsRef<[D::Observation]>,
    {
        let sequences: Vec<&'a [D::Observation]> = sequences.iter().map(AsRef::as_ref).collect();
        let observations = sequences.iter().flat_map(|&s| s.iter()).collect();
        let kmeans = KMeans::from_refs(n_states, observations, DEFAULT_MAX_ITERATIONS)?;

        let mut labels = Vec::with_capacity(sequences.len());
        let mut offset = 0;
        for sequence in &sequences {
            labels.push(kmeans.labels()[offset..offset + sequence.len()].to_vec());
            offset += sequence.len();
        }

        Ok(Self {
            sequences,
            labels,
            opdfs: (0..n_states).map(|_| factory.generate()).collect(),
        })
    }

    /// The current state of every observation, one vector per sequence
    pub fn labels(&self) -> &[Vec<usize>] {
        &self.labels
    }

    /// Estimate an HMM from the current state assignments.
    ///
    /// Each state's opdf is fit to the observations assigned to it; a state with none keeps
    /// its previous opdf.
    pub fn estimate(&self) -> Result<Hmm<D>> {
        let n = self.opdfs.len();
        let mut pi = Array1::zeros(n);
        let mut a = Array2::zeros((n, n));
        for labels in &self.labels {
            if let Some(&first) = labels.first() {
                pi[first] += 1.0;
            }
            for window in labels.windows(2) {
                a[(window[0], window[1])] += 1.0;
            }
        }
        pi.nip();
        a.nip_rows();

        let mut opdfs = self.opdfs.clone();
        for (state, opdf) in opdfs.iter_mut().enumerate() {
            let members: Vec<&D::Observation> = self
                .sequences
                .iter()
                .zip(&self.labels)
                .flat_map(|(sequence, labels)| {
                    sequence
                        .iter()
                        .zip(labels)
                        .filter(move |(_, label)| **label == state)
                        .map(|(o, _)| o)
                })
                .collect();
            if !members.is_empty() {
                opdf.fit_uniform(&members).map_err(|source| Error::Refit {
                    state,
                    source: Box::new(source),
                })?;
            }
        }

        Hmm::new(pi, a, opdfs)
    }

    /// Estimate an HMM, then reassign every sequence to its most likely state sequence under it.
    ///
    /// Returns the estimate and whether any assignment changed.
    pub fn iterate(&mut self) -> Result<(Hmm<D>, bool)> {
        let hmm = self.estimate()?;
        let mut changed = false;
        for (sequence, labels) in self.sequences.iter().zip(self.labels.iter_mut()) {
            if sequence.is_empty() {
                continue;
            }
            let path = hmm.most_likely_state_sequence(sequence)?;
            changed |= path != *labels;
            *labels = path;
        }
        self.opdfs = hmm.opdfs().to_vec();
        Ok((hmm, changed))
    }

    /// Iterate until the assignments are stable, at most `max_iterations` times, and return the
    /// final estimate.
    pub fn learn(&mut self, max_iterations: usize) -> Result<Hmm<D>> {
        for iteration in 0..max_iterations {
            let (_, changed) = self.iterate()?;
            if !changed {
                debug!(iterations = iteration + 1, "segmental k-means converged");
                break;
            }
        }
        self.estimate()
    }
}

impl<D> Hmm<D>
where
    D: Opdf,
    D::Observation: Clusterable,
{
    /// An HMM estimated from a k-means clustering of every observation into `n_states` states.
    pub fn from_kmeans<F, S>(n_states: usize, factory: &F, sequences: &[S]) -> Result<Self>
    where
        F: OpdfFactory<D>,
        S: AsRef<[D::Observation]>,
    {
        KMeansLearner::new(n_states, factory, sequences)?.estimate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opdf::{OpdfDiscrete, OpdfDiscreteFactory, OpdfGaussian};
    use crate::sampler::new_rng;
    use rand::Rng;
    use spectral::prelude::*;

    #[test]
    fn twenty_clusters_over_uniform_data() {
        let mut rng = new_rng();
        let observations: Vec<f64> = (0..30_000).map(|_| rng.gen_range(0.0..10.0)).collect();
        let kmeans = KMeans::new(20, &observations).unwrap();
        assert_eq!(20, kmeans.n_clusters());
        assert_eq!(30_000, kmeans.labels().len());
        for i in 0..20 {
            assert!(!kmeans.cluster(i).is_empty());
        }
    }

    #[test]
    fn too_few_distinct_observations() {
        let observations: Vec<usize> = (0..1000).map(|i| i % 10).collect();
        assert!(matches!(
            KMeans::new(20, &observations),
            Err(Error::DegenerateClustering {
                requested: 20,
                distinct: 10
            })
        ));
        assert!(KMeans::new(10, &observations).is_ok());
    }

    #[test]
    fn bad_arguments() {
        assert!(matches!(
            KMeans::new(0, &[1.0, 2.0]),
            Err(Error::InvalidConstruction(_))
        ));
        let empty: [f64; 0] = [];
        assert!(matches!(KMeans::new(1, &empty), Err(Error::EmptySequence)));
    }

    #[test]
    fn separated_groups() {
        let observations = [1.0, 10.0, 1.1, 9.8, 0.9, 10.2];
        let kmeans = KMeans::new(2, &observations).unwrap();
        assert!(kmeans.converged());
        assert_eq!(&[0, 1, 0, 1, 0, 1], kmeans.labels());
        assert_that(kmeans.centroid(0)).is_close_to(1.0, 1e-12);
        assert_that(kmeans.centroid(1)).is_close_to(10.0, 1e-12);
        assert_eq!(vec![&1.0, &1.1, &0.9], kmeans.cluster(0));
    }

    #[test]
    fn euclidean_vectors() {
        let observations = vec![
            array![0.0, 0.0],
            array![0.1, 0.1],
            array![10.0, 10.0],
            array![0.2, 0.0],
            array![10.1, 10.1],
        ];
        let kmeans = KMeans::new(2, &observations).unwrap();
        let labels = kmeans.labels();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[0], labels[3]);
        assert_eq!(labels[2], labels[4]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn single_cluster() {
        let kmeans = KMeans::new(1, &[3usize, 4, 5]).unwrap();
        assert_eq!(&[0, 0, 0], kmeans.labels());
        assert_that(kmeans.centroid(0)).is_close_to(4.0, 1e-12);
    }

    #[test]
    fn as_many_clusters_as_observations() {
        let kmeans = KMeans::new(4, &[0.0, 1.0, 2.0, 3.0]).unwrap();
        for i in 0..4 {
            assert_eq!(1, kmeans.cluster(i).len());
        }
    }

    #[test]
    fn input_observations_cluster_by_value() {
        let observations = vec![
            InputObservation::new(0, 1.0),
            InputObservation::new(1, 1.2),
            InputObservation::new(0, 8.0),
        ];
        let kmeans = KMeans::new(2, &observations).unwrap();
        assert_eq!(&[0, 0, 1], kmeans.labels());
    }

    fn discrete_sequences() -> Vec<Vec<usize>> {
        vec![
            vec![0, 1, 0, 9, 8, 9, 9, 1, 0],
            vec![8, 9, 8, 0, 0, 1],
            vec![1, 0, 1, 1, 8, 9],
        ]
    }

    #[test]
    fn learner_estimate_is_valid() {
        let factory = OpdfDiscreteFactory::new(10).unwrap();
        let sequences = discrete_sequences();
        let learner: KMeansLearner<OpdfDiscrete> =
            KMeansLearner::new(2, &factory, &sequences).unwrap();
        let hmm = learner.estimate().unwrap();
        assert_that(&hmm.pi().sum()).is_close_to(1.0, 1e-9);
        for row in hmm.a().rows() {
            assert_that(&row.sum()).is_close_to(1.0, 1e-9);
        }

        // The low symbols and the high symbols end up in different states
        let low = learner.labels()[0][0];
        let high = learner.labels()[0][3];
        assert_ne!(low, high);
        assert_that(&hmm.opdf(low).probability(&9)).is_equal_to(0.0);
        assert_that(&hmm.opdf(high).probability(&0)).is_equal_to(0.0);

        assert_eq!(hmm, Hmm::from_kmeans(2, &factory, &sequences).unwrap());
    }

    #[test]
    fn learner_converges() {
        let factory = OpdfDiscreteFactory::new(10).unwrap();
        let sequences = discrete_sequences();
        let mut learner: KMeansLearner<OpdfDiscrete> =
            KMeansLearner::new(2, &factory, &sequences).unwrap();
        let hmm = learner.learn(10).unwrap();
        let (_, changed) = learner.iterate().unwrap();
        assert!(!changed);
        for (sequence, labels) in sequences.iter().zip(learner.labels()) {
            assert_eq!(&hmm.most_likely_state_sequence(sequence).unwrap(), labels);
        }
    }

    #[test]
    fn states_without_members_keep_their_opdf() {
        let sequences = vec![vec![0.0, 0.5, 5.0, 5.5]];
        let factory = || OpdfGaussian::new(2.0, 3.0).unwrap();
        let mut learner = KMeansLearner::new(2, &factory, &sequences).unwrap();
        learner.labels = vec![vec![0, 0, 0, 0]];
        let hmm = learner.estimate().unwrap();
        assert_eq!(&OpdfGaussian::new(2.0, 3.0).unwrap(), hmm.opdf(1));
        assert_that(&hmm.opdf(0).mean()).is_close_to(2.75, 1e-12);
        // The unused state is uniform
        assert_eq!(array![0.5, 0.5], hmm.a().row(1));
    }

    #[test]
    fn learner_with_discrete_opdfs_directly() {
        let sequences = discrete_sequences();
        let opdf = OpdfDiscrete::new(10).unwrap();
        let hmm: Hmm<OpdfDiscrete> =
            Hmm::from_kmeans(3, &|| opdf.clone(), &sequences).unwrap();
        assert_eq!(3, hmm.n_states());
    }
}
